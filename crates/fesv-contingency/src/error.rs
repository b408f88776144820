//! # Contingency Error Types
//!
//! Error types for queue intake, workers and reconciliation.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Contingency Error Categories                         │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Domain      │  │       Store             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Validation     │  │  Database (DbError)     │ │
//! │  │  ConfigLoad     │  │  Domain         │  │  StoreTimeout           │ │
//! │  │                 │  │  NotFound       │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────────────────────────┐  ┌─────────────────────────┐ │
//! │  │           Collaborators             │  │       Internal          │ │
//! │  │                                     │  │                         │ │
//! │  │  Authority (AuthorityError)         │  │  ChannelError           │ │
//! │  │  Signer (SignerError)               │  │  Internal               │ │
//! │  │  Credentials (CredentialError)      │  │                         │ │
//! │  └─────────────────────────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use thiserror::Error;

use fesv_core::{CoreError, ValidationError};
use fesv_db::DbError;

use crate::collaborators::{AuthorityError, CredentialError, SignerError};

/// Result type alias for contingency operations.
pub type ContingencyResult<T> = Result<T, ContingencyError>;

/// Every failure the engine can surface to a caller.
#[derive(Debug, Error)]
pub enum ContingencyError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid contingency configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// Input rejected before any side effect. Never retried.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// State machine violation (e.g. queueing a `procesado` document).
    #[error("{0}")]
    Domain(#[from] CoreError),

    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// A store call did not finish in time; its transaction was rolled back.
    #[error("Store operation timed out after {0:?}")]
    StoreTimeout(Duration),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Authority error: {0}")]
    Authority(#[from] AuthorityError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Credential error: {0}")]
    Credentials(#[from] CredentialError),

    /// Failed to serialize a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to render an operator report.
    #[error("Report generation failed: {0}")]
    Report(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for ContingencyError {
    fn from(err: serde_json::Error) -> Self {
        ContingencyError::SerializationFailed(err.to_string())
    }
}

impl From<csv::Error> for ContingencyError {
    fn from(err: csv::Error) -> Self {
        ContingencyError::Report(err.to_string())
    }
}

impl From<sqlx::Error> for ContingencyError {
    fn from(err: sqlx::Error) -> Self {
        ContingencyError::Database(err.into())
    }
}

impl From<std::io::Error> for ContingencyError {
    fn from(err: std::io::Error) -> Self {
        ContingencyError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ContingencyError {
    fn from(err: toml::de::Error) -> Self {
        ContingencyError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl ContingencyError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        ContingencyError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Returns true if the operation can be attempted again later.
    ///
    /// ## Retryable Errors
    /// - Store busy/locked, pool exhaustion, store timeouts
    /// - Authority unavailable or timed out
    /// - Signer unavailable or timed out
    ///
    /// ## Non-Retryable Errors
    /// - Validation and state machine errors
    /// - Configuration errors
    /// - Authority rejections and bad credentials
    pub fn is_retryable(&self) -> bool {
        match self {
            ContingencyError::Database(e) => e.is_transient(),
            ContingencyError::StoreTimeout(_) => true,
            ContingencyError::Authority(e) => e.is_transient(),
            ContingencyError::Signer(e) => e.is_transient(),
            ContingencyError::Credentials(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns true if the caller sent something that will never succeed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ContingencyError::Validation(_)
                | ContingencyError::Domain(_)
                | ContingencyError::NotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(ContingencyError::StoreTimeout(Duration::from_secs(5)).is_retryable());
        assert!(
            ContingencyError::Authority(AuthorityError::Unavailable("503".into())).is_retryable()
        );
        assert!(ContingencyError::Signer(SignerError::Timeout(Duration::from_secs(3))).is_retryable());

        assert!(!ContingencyError::InvalidConfig("bad".into()).is_retryable());
        assert!(!ContingencyError::Validation(ValidationError::Empty {
            field: "documents".into()
        })
        .is_retryable());
        assert!(
            !ContingencyError::Authority(AuthorityError::Unauthorized("bad password".into()))
                .is_retryable()
        );
    }

    #[test]
    fn test_validation_classification() {
        let err: ContingencyError = ValidationError::TooMany {
            field: "documents".into(),
            max: 1000,
            actual: 1001,
        }
        .into();
        assert!(err.is_validation());
        assert!(!ContingencyError::ChannelError("closed".into()).is_validation());
    }

    #[test]
    fn test_error_display() {
        let err = ContingencyError::not_found("Document", "ABC-123");
        assert_eq!(err.to_string(), "Document not found: ABC-123");
    }
}
