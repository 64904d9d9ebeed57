//! # Database Error Types
//!
//! Error types for record access.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  Postgres Error (sqlx::Error)                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← SQLSTATE categorization                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  .context("batchResults.Exec") ← call-site label, source preserved      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Service layer decides the API response                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in this crate retries, logs or swallows an error it returns.

use syllabus_core::ValidationError;
use thiserror::Error;

/// SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// SQLSTATE for `foreign_key_violation`.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// SQLSTATE for `query_canceled` (statement timeout or cancel request).
const QUERY_CANCELED: &str = "57014";

/// Record access errors.
#[derive(Debug, Error)]
pub enum DbError {
    // =========================================================================
    // Contract Errors
    // =========================================================================
    /// A single-row lookup matched nothing.
    ///
    /// ## When This Occurs
    /// - The id doesn't exist
    /// - The row is soft-deleted
    /// - A targeted delete touched zero rows
    #[error("{entity} not found: {key}")]
    NotFound { entity: String, key: String },

    /// A write reported a different row count than the one it must touch.
    ///
    /// ## When This Occurs
    /// - An insert was swallowed by `ON CONFLICT DO NOTHING`
    /// - An update targeted a missing or soft-deleted row
    /// - A guarded counter update (`stream_learner_counter < max`) refused
    #[error("cannot {action} {entity}")]
    RowsAffected {
        action: String,
        entity: String,
        expected: u64,
        actual: u64,
    },

    /// An executor error labelled with the operation that issued it.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<DbError>,
    },

    /// A record failed its pre-queue check; nothing was sent.
    #[error("invalid record: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Executor Errors
    // =========================================================================
    /// Unique constraint violation (SQLSTATE 23505).
    #[error("Duplicate value violates {constraint}: {message}")]
    UniqueViolation { constraint: String, message: String },

    /// Foreign key constraint violation (SQLSTATE 23503).
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Any other error reported by Postgres.
    #[error("Query failed: {message}")]
    QueryFailed {
        message: String,
        /// SQLSTATE, when the server supplied one.
        code: Option<String>,
    },

    /// A column could not be converted into the requested type.
    #[error("Cannot decode column {column}: {message}")]
    Decode { column: String, message: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Transaction failed to begin, commit or roll back.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    // =========================================================================
    // Batch Bookkeeping
    // =========================================================================
    /// Results were read more times than statements were queued.
    #[error("batch has no result left: {queued} statement(s) queued")]
    BatchExhausted { queued: usize },

    /// The statement never ran because an earlier one in the batch failed.
    #[error("statement {index} skipped after an earlier batch failure")]
    BatchAborted { index: usize },

    // =========================================================================
    // Other
    // =========================================================================
    /// Cache backend failure.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity and lookup key.
    pub fn not_found(entity: impl Into<String>, key: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// A write expected to touch `expected` rows touched `actual`.
    pub fn rows_affected(
        action: impl Into<String>,
        entity: impl Into<String>,
        expected: u64,
        actual: u64,
    ) -> Self {
        DbError::RowsAffected {
            action: action.into(),
            entity: entity.into(),
            expected,
            actual,
        }
    }

    /// `cannot insert new <table>`.
    pub fn cannot_insert(table: &str, actual: u64) -> Self {
        DbError::rows_affected("insert new", table, 1, actual)
    }

    /// `cannot update <table>`.
    pub fn cannot_update(table: &str, actual: u64) -> Self {
        DbError::rows_affected("update", table, 1, actual)
    }

    /// `cannot upsert <table>`.
    pub fn cannot_upsert(table: &str, actual: u64) -> Self {
        DbError::rows_affected("upsert", table, 1, actual)
    }

    /// Whether this is (or wraps) a not-found condition.
    pub fn is_not_found(&self) -> bool {
        match self {
            DbError::NotFound { .. } => true,
            DbError::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether this is (or wraps) a row-count mismatch.
    pub fn is_rows_affected(&self) -> bool {
        match self {
            DbError::RowsAffected { .. } => true,
            DbError::Context { source, .. } => source.is_rows_affected(),
            _ => false,
        }
    }

    /// The innermost error beneath any context labels.
    pub fn root(&self) -> &DbError {
        match self {
            DbError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// SQLSTATE of the underlying database error, if any.
    pub fn code(&self) -> Option<&str> {
        match self.root() {
            DbError::UniqueViolation { .. } => Some(UNIQUE_VIOLATION),
            DbError::ForeignKeyViolation { .. } => Some(FOREIGN_KEY_VIOLATION),
            DbError::QueryFailed { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether the statement was cancelled by the server.
    pub fn is_cancelled(&self) -> bool {
        self.code() == Some(QUERY_CANCELED)
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → SQLSTATE 23505 / 23503 / other
/// sqlx::Error::ColumnDecode   → DbError::Decode
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// sqlx::Error::PoolClosed/Io  → DbError::ConnectionFailed
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("row", ""),

            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                let code = db_err.code().map(|c| c.into_owned());

                match code.as_deref() {
                    Some(UNIQUE_VIOLATION) => DbError::UniqueViolation {
                        constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                        message,
                    },
                    Some(FOREIGN_KEY_VIOLATION) => DbError::ForeignKeyViolation { message },
                    _ => DbError::QueryFailed { message, code },
                }
            }

            sqlx::Error::ColumnDecode { index, source } => DbError::Decode {
                column: index,
                message: source.to_string(),
            },

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            sqlx::Error::Io(io) => DbError::ConnectionFailed(io.to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<redis::RedisError> for DbError {
    fn from(err: redis::RedisError) -> Self {
        DbError::Cache(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Context Labels
// =============================================================================

/// Adds a call-site label to an error.
///
/// ```rust,ignore
/// let tag = results.exec().context("batchResults.Exec")?;
/// ```
pub trait ResultExt<T> {
    /// Wraps the error as `"<label>: <cause>"`.
    ///
    /// Not-found errors pass through unchanged so callers can match on them.
    fn context(self, label: &str) -> DbResult<T>;
}

impl<T> ResultExt<T> for DbResult<T> {
    fn context(self, label: &str) -> DbResult<T> {
        self.map_err(|err| match err {
            err @ DbError::NotFound { .. } => err,
            err => DbError::Context {
                context: label.to_string(),
                source: Box::new(err),
            },
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_cannot_insert_message() {
        let err = DbError::cannot_insert("quizzes", 0);
        assert_eq!(err.to_string(), "cannot insert new quizzes");
        assert!(err.is_rows_affected());
    }

    #[test]
    fn test_context_wraps_and_preserves_source() {
        let err: DbResult<()> = Err(DbError::QueryFailed {
            message: "deadlock detected".to_string(),
            code: Some("40P01".to_string()),
        });
        let err = err.context("batchResults.Exec").unwrap_err();

        assert_eq!(
            err.to_string(),
            "batchResults.Exec: Query failed: deadlock detected"
        );
        assert_eq!(err.code(), Some("40P01"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_context_leaves_not_found_unwrapped() {
        let err: DbResult<()> = Err(DbError::not_found("topics", "topic-1"));
        let err = err.context("TopicRepo.RetrieveByID").unwrap_err();

        assert!(matches!(err, DbError::NotFound { .. }));
        assert_eq!(err.to_string(), "topics not found: topic-1");
    }

    #[test]
    fn test_is_not_found_sees_through_context() {
        let err = DbError::Context {
            context: "outer".to_string(),
            source: Box::new(DbError::not_found("books", "b1")),
        };
        assert!(err.is_not_found());
        assert!(!DbError::PoolExhausted.is_not_found());
    }

    #[test]
    fn test_cancelled_statement() {
        let err = DbError::QueryFailed {
            message: "canceling statement due to statement timeout".to_string(),
            code: Some(QUERY_CANCELED.to_string()),
        };
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }
}
