//! Memory stores for forgehand.
//!
//! Memory cards are persisted per project and re-ranked in memory on every
//! lookup; there is no index to keep in sync.

pub mod file_store;
pub mod in_memory;
pub mod rank;

pub use file_store::JsonFileStore;
pub use in_memory::InMemoryStore;
pub use rank::{extract_terms, rank, score, search};
