//! Delivery pipeline: per-job orchestration, the polling worker loop and the
//! rate-limited bulk sender.
//!
//! Workers coordinate only through [`JobStore::claim_pending`]; nothing here
//! shares in-memory state between them.
//!
//! [`JobStore::claim_pending`]: crate::jobs::JobStore::claim_pending

pub mod bulk;
pub mod service;
pub mod worker;

pub use bulk::{BulkItemResult, BulkReport, BulkSender};
pub use service::{BatchReport, DeliveryOutcome, DeliveryService};
pub use worker::{DeliveryWorker, DeliveryWorkerConfig, DeliveryWorkerHandle, WorkerStats};
