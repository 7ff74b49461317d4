//! Common error types for tonedesk

use thiserror::Error;

/// Common result type for tonedesk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the tonedesk crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of a persisted column failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error means the storage backend itself is unreachable,
    /// as opposed to a bad query or a missing row.
    pub fn is_connectivity(&self) -> bool {
        match self {
            #[cfg(feature = "sqlx")]
            Error::Database(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                // SQLITE_IOERR (10) and SQLITE_CANTOPEN (14)
                sqlx::Error::Database(db_err) => {
                    matches!(db_err.code().as_deref(), Some("10") | Some("14"))
                }
                _ => false,
            },
            _ => false,
        }
    }
}
