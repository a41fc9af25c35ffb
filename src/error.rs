//! Error hierarchy for RecoveryRS
//!
//! The scoring engine is total and never returns errors. Everything here
//! describes failures of the surrounding collaborators: storage, configuration
//! and user input at the CLI boundary.

use thiserror::Error;

use crate::database::DatabaseError;

/// Top-level error type for storage and pipeline operations
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Storage failures
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected user input (bad dates, unknown user ids, empty ranges)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Encoding or decoding output
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for recovery pipeline operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Opaque text shown when recovery data could not be loaded or stored
pub const DATA_UNAVAILABLE_MESSAGE: &str = "recovery data unavailable, please retry";

impl RecoveryError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RecoveryError::Database(DatabaseError::Sqlite(_)) | RecoveryError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RecoveryError::Validation(_) => ErrorSeverity::Warning,
            RecoveryError::Database(DatabaseError::NotFound(_)) => ErrorSeverity::Warning,
            RecoveryError::Database(DatabaseError::ActiveDeload(_)) => ErrorSeverity::Info,
            RecoveryError::Database(_) => ErrorSeverity::Error,
            RecoveryError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RecoveryError::Database(DatabaseError::Sqlite(_))
            | RecoveryError::Database(DatabaseError::Serialization(_))
            | RecoveryError::Io(_) => DATA_UNAVAILABLE_MESSAGE.to_string(),
            RecoveryError::Database(DatabaseError::ActiveDeload(start)) => {
                format!("A deload cycle is already active since {}", start)
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}
