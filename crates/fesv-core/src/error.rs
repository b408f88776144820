//! # Error Types
//!
//! Domain-specific error types for fesv-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fesv-core errors (this file)                                          │
//! │  ├── CoreError        - State machine / domain rule violations         │
//! │  └── ValidationError  - Input rejected before any side effect          │
//! │                                                                         │
//! │  fesv-db errors                                                        │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  fesv-contingency errors                                               │
//! │  └── ContingencyError - Wraps all of the above plus collaborators      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → ContingencyError → caller/worker  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Validation errors are never retried: an event with 1001 documents will
//! still have 1001 documents on the next attempt.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A document was asked to move along an edge the state machine lacks.
    ///
    /// ## When This Occurs
    /// - Queueing a document already `procesado` or `rechazado`
    /// - Recording a signature for a document that is not waiting for one
    #[error("Document {document_id} cannot move from {from} to {to}")]
    InvalidTransition {
        document_id: String,
        from: String,
        to: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// A collection that must hold at least one element is empty.
    #[error("{field} must not be empty")]
    Empty { field: String },

    /// A collection exceeds its hard ceiling.
    #[error("{field} allows at most {max} entries, got {actual}")]
    TooMany {
        field: String,
        max: usize,
        actual: usize,
    },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., invalid UUID, invalid date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A contingency period is still open (no end date/time).
    #[error("Contingency period {period_id} has not been closed")]
    PeriodNotClosed { period_id: String },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::TooMany {
            field: "documents".to_string(),
            max: 1000,
            actual: 1001,
        };
        assert_eq!(
            err.to_string(),
            "documents allows at most 1000 entries, got 1001"
        );

        let err = ValidationError::Required {
            field: "cod_punto_venta".to_string(),
        };
        assert_eq!(err.to_string(), "cod_punto_venta is required");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let err: CoreError = ValidationError::Empty {
            field: "documents".to_string(),
        }
        .into();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
