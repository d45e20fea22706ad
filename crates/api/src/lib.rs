//! HTTP admin API for the mail pipeline: routing, request mapping and
//! service wiring.

pub mod app;
