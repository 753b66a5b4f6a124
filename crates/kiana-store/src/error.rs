// ABOUTME: Error taxonomy for the serialized store.
// ABOUTME: Separates expected outcomes (constraint, validation) from connection faults.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur while talking to the serialized store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness or other database-enforced constraint rejected the statement.
    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// Caller-supplied data was rejected before it reached the database.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("store closed")]
    Closed,

    #[error("connection error: {0}")]
    Connection(#[source] rusqlite::Error),

    #[error("schema {name} failed to apply: {source}")]
    Schema {
        name: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("row mapping failed: {source}")]
    Row {
        #[source]
        source: rusqlite::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True when the database rejected a statement because of a constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::ConstraintViolation { .. })
    }

    /// True for failures the process cannot expect to recover from: the store
    /// is gone, the engine itself failed, or a schema set is malformed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Closed
                | StoreError::Connection(_)
                | StoreError::Schema { .. }
                | StoreError::Io(_)
        )
    }

    /// Classify a statement failure coming out of rusqlite.
    pub fn from_statement(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref inner, ref message)
                if inner.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::ConstraintViolation {
                    message: message.clone().unwrap_or_else(|| inner.to_string()),
                }
            }
            rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::InvalidColumnIndex(_)
            | rusqlite::Error::InvalidColumnName(_)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => StoreError::Row { source: err },
            other => StoreError::Connection(other),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::from_statement(err)
    }
}
