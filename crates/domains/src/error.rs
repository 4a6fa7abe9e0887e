//! # Error Taxonomy
//!
//! Centralized error handling for the answerboard core.
//! Maps derived-state failures to actionable error types.

use thiserror::Error;
use uuid::Uuid;

/// The primary error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed event. Logged, dropped, no side effects.
    #[error("validation error: {0}")]
    Validation(String),

    /// Target entity vanished between event creation and processing.
    /// A benign race; the event is dropped.
    #[error("{0} not found with ID {1}")]
    NotFound(&'static str, Uuid),

    /// Unique-constraint violation, e.g. a duplicate vote.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Derived-state write failed; the whole unit of work rolled back.
    #[error("consistency failure: {0}")]
    Consistency(String),

    /// Infrastructure failure (store down, lock poisoned).
    #[error("internal service error: {0}")]
    Internal(String),
}

/// A specialized Result type for engine logic.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by a [`crate::ports::ConsistencyStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found with ID {1}")]
    NotFound(&'static str, Uuid),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient contention (lock wait, serialization failure).
    /// Safe to retry once the conflicting writer has finished.
    #[error("store busy: {0}")]
    Busy(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity, id) => EngineError::NotFound(entity, id),
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            StoreError::Busy(msg) | StoreError::Backend(msg) => EngineError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_the_only_retryable_store_error() {
        assert!(StoreError::Busy("locked".into()).is_retryable());
        assert!(!StoreError::Backend("down".into()).is_retryable());
        assert!(!StoreError::Conflict("dup".into()).is_retryable());
    }

    #[test]
    fn store_errors_map_onto_the_engine_taxonomy() {
        let id = Uuid::now_v7();
        let mapped: EngineError = StoreError::NotFound("content", id).into();
        assert!(matches!(mapped, EngineError::NotFound("content", got) if got == id));
    }
}
