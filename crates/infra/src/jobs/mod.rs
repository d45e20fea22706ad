//! Mail job queue with atomic lease claiming.
//!
//! ## Design
//!
//! - Jobs live in a durable table; the store is the only coordination point
//!   between workers (no in-process scheduler owns the queue)
//! - `claim_pending` selects and leases jobs in one atomic step, so concurrent
//!   claimers always receive disjoint sets
//! - Leases never expire on their own; stale `processing` jobs are listed by
//!   `list_stale` and returned to the queue only through `release`
//!
//! ## Components
//!
//! - `JobStore`: repository contract
//! - `InMemoryJobStore`: `RwLock`-guarded map for tests/dev
//! - `PostgresJobStore`: `FOR UPDATE SKIP LOCKED` claim

pub mod postgres;
pub mod store;

pub use postgres::PostgresJobStore;
pub use store::{InMemoryJobStore, JobStats, JobStore};
