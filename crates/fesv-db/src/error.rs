//! # Database Error Types
//!
//! Error types for store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Classified by constraint kind                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ContingencyError (fesv-contingency) ← Decides retry vs. give up       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Worker logs and moves on to the next unit                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::error::ErrorKind;
use thiserror::Error;

use fesv_core::ValidationError;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - `fetch_one` returns no rows
    /// - Document, period or lote ID doesn't exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Duplicate codigo de generación or numero de control
    /// - Generated primary key collided with an existing row
    /// - A second active period for the same scope
    #[error("Unique constraint violated: {message}")]
    UniqueViolation { message: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Document references a non-existent point of sale
    /// - Event references a non-existent period
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// CHECK or NOT NULL constraint violation.
    ///
    /// ## When This Occurs
    /// - Event with more than 1000 documents
    /// - Unknown status string
    #[error("Constraint violated: {message}")]
    CheckViolation { message: String },

    /// Stored data failed a domain rule (e.g. missing outlet code).
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::UniqueViolation { .. })
    }

    /// Whether the same call may succeed if attempted again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DbError::PoolExhausted
                | DbError::ConnectionFailed(_)
                | DbError::QueryFailed(_)
                | DbError::TransactionFailed(_)
        )
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound              → DbError::NotFound
/// ErrorKind::UniqueViolation            → DbError::UniqueViolation
/// ErrorKind::ForeignKeyViolation        → DbError::ForeignKeyViolation
/// ErrorKind::{NotNull,Check}Violation   → DbError::CheckViolation
/// other database errors                 → DbError::QueryFailed
/// sqlx::Error::PoolTimedOut             → DbError::PoolExhausted
/// Other                                 → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),

            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.kind() {
                    ErrorKind::UniqueViolation => DbError::UniqueViolation { message },
                    ErrorKind::ForeignKeyViolation => DbError::ForeignKeyViolation { message },
                    ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
                        DbError::CheckViolation { message }
                    }
                    _ => DbError::QueryFailed(message),
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
