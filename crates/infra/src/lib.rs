//! Infrastructure layer: repositories, vendor adapters, delivery pipeline, config.

pub mod admin;
pub mod catalog;
pub mod config;
pub mod delivery;
pub mod error;
pub mod jobs;
pub mod mail_log;
pub mod prober;
pub mod schema;
pub mod selector;
pub mod store;
pub mod vendors;

#[cfg(test)]
mod integration_tests;

pub use error::PipelineError;
pub use store::{Pagination, StoreError};
