//! `mailroom-core`: shared building blocks for the mail pipeline.
//!
//! This crate contains **pure** primitives (identifiers and the error model);
//! no infrastructure concerns.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{FlowId, JobId, LogId, ProviderId, TemplateId};
