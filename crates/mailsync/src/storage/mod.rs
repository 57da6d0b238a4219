//! Storage traits and implementations
//!
//! The sync engine only sees the traits in [`traits`]; the in-memory store
//! backs tests and the SQLite store backs the service.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{AccountRegistry, ContactDirectory, CursorStore, MessageStore, TokenStore};
