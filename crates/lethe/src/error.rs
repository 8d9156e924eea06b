//! Error types for Lethe

use thiserror::Error;

/// Main error type for Lethe operations
#[derive(Error, Debug)]
pub enum LetheError {
    /// Storage-related errors (LanceDB, missing tables, file system, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A record that was expected to exist could not be found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A manifestation status transition that the state machine forbids
    #[error("Invalid transition for manifestation {id}: cannot {action} from {from}")]
    InvalidTransition {
        id: String,
        from: String,
        action: &'static str,
    },

    /// The proposed action has no executor at this layer
    #[error("Action '{0}' requires manual execution")]
    ManualExecutionRequired(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl From<serde_json::Error> for LetheError {
    fn from(err: serde_json::Error) -> Self {
        LetheError::Serialization(err.to_string())
    }
}

/// Result type alias for Lethe operations
pub type Result<T> = std::result::Result<T, LetheError>;
