//! answerboard/crates/storage-adapters/src/lib.rs
//!
//! `ConsistencyStore` implementations: an in-memory store that is always
//! available, and a SQLite store behind the `db-sqlite` feature.

pub mod memory;

#[cfg(feature = "db-sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;

#[cfg(feature = "db-sqlite")]
pub use sqlite::SqliteStore;
