//! Error types for fabric-state

use thiserror::Error;

/// Errors that can occur in the persistence layer
#[derive(Error, Debug)]
pub enum StateError {
    /// Log or database file could not be read or written
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// A memory with this id already exists
    #[error("duplicate memory id: {id}")]
    DuplicateId { id: String },

    /// Operation attempted after `close()`
    #[error("store is closed")]
    Closed,

    /// Write lock could not be acquired within the configured wait
    #[error("write lock not acquired within {waited_ms} ms")]
    LockTimeout { waited_ms: u64 },

    /// Lookup by an unknown id
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Rejected input (out-of-range importance, empty event type, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Any other SQLite failure
    #[error("database error: {0}")]
    Database(String),

    /// JSON encoding failure
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StateError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StateError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Map a rusqlite error, turning busy/locked into `LockTimeout`.
    pub(crate) fn from_sqlite(err: rusqlite::Error, waited_ms: u64) -> Self {
        if let rusqlite::Error::SqliteFailure(ref code, _) = err {
            if matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return StateError::LockTimeout { waited_ms };
            }
        }
        StateError::Database(err.to_string())
    }
}

impl From<rusqlite::Error> for StateError {
    fn from(err: rusqlite::Error) -> Self {
        StateError::from_sqlite(err, 0)
    }
}

/// Result type for fabric-state operations
pub type Result<T> = std::result::Result<T, StateError>;
