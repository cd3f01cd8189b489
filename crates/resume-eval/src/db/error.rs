//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating the database directory.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A write was refused by a schema constraint (CHECK, UNIQUE, foreign key).
    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    /// Lock contention and I/O hiccups may clear up; constraint and
    /// migration failures will not.
    pub fn is_transient(&self) -> bool {
        match self {
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::SystemIoFailure
            ),
            DatabaseError::Io { .. } => true,
            _ => false,
        }
    }
}
