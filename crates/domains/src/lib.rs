//! answerboard/crates/domains/src/lib.rs
//!
//! The central domain model, event contract, and port definitions for the
//! answerboard consistency core.

pub mod error;
pub mod events;
pub mod models;
pub mod ports;

// Re-exporting for easier access in other crates
pub use error::*;
pub use events::*;
pub use models::*;
pub use ports::*;
