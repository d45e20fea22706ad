//! Provider registry, flow bindings and template store.
//!
//! The three entities reference each other (flow -> provider, flow ->
//! template, template -> flow), and deletes are restricted while referenced,
//! so one backing store implements all three repository traits.

pub mod postgres;
pub mod store;

pub use postgres::PostgresCatalog;
pub use store::{FlowStore, InMemoryCatalog, ProviderStore, TemplateStore};
