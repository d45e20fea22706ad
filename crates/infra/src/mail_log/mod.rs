//! Append-only delivery log.

pub mod postgres;
pub mod store;

pub use postgres::PostgresMailLogStore;
pub use store::{InMemoryMailLogStore, LogFilter, LogQueryResult, MailLogStore};
