//! Memory module for Memoria
//!
//! Provides the record model, the store abstraction with in-process and
//! SQLite backends, and prompt context assembly.

mod context;
mod record;
mod sqlite;
mod store;

pub use context::ContextBuilder;
pub use record::{Category, MemoryId, MemoryRecord};
pub use sqlite::SqliteMemoryStore;
pub use store::{InMemoryStore, MemoryStore};
pub(crate) use store::validate_content;
