//! Error types for haven-alerts

use thiserror::Error;

/// Errors that can occur in the alerting core
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input to a lifecycle transition or dispatch call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transition attempted from a state that does not allow it
    #[error("Invalid state for alert '{alert_id}': expected {expected}, found {found}")]
    InvalidState {
        alert_id: String,
        expected: String,
        found: String,
    },

    /// External inference backend unreachable or unusable
    ///
    /// Always recovered locally via the heuristic fallback; never
    /// surfaced to a dispatch caller.
    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    /// Durable write failed while raising an alert
    #[error("Dispatch failure: {0}")]
    Dispatch(String),

    /// An event handler raised after its retry budget
    #[error("Handler failure: {0}")]
    Handler(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for alerting operations
pub type Result<T> = std::result::Result<T, Error>;
