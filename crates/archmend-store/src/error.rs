use std::fmt;

use archmend_types::Interrupt;

/// Result type for archmend-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the persistence layer
#[derive(Debug)]
pub enum Error {
    /// Event-store database operation failed
    Database(rusqlite::Error),

    /// IO operation failed
    Io(std::io::Error),

    /// Baseline archive could not be read
    Loader(archmend_loader::Error),

    /// Payload (de)serialization failed
    Json(serde_json::Error),

    /// Advisory lock on the archive is held by another operator
    LockContention(String),

    /// Attempted mutation of an immutable event record
    Immutable(String),

    /// Backend refused the operation
    Storage(String),

    /// Referenced session, event, or snapshot does not exist
    NotFound(String),

    /// Cooperative cancellation observed at a checkpoint
    Cancelled,

    /// Operation deadline expired
    Timeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Database(err) => write!(f, "Database error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Loader(err) => write!(f, "Archive load error: {}", err),
            Error::Json(err) => write!(f, "Serialization error: {}", err),
            Error::LockContention(msg) => write!(f, "Lock contention: {}", msg),
            Error::Immutable(msg) => write!(f, "Immutability violation: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Timeout => write!(f, "Operation deadline expired"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Loader(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<archmend_loader::Error> for Error {
    fn from(err: archmend_loader::Error) -> Self {
        Error::Loader(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<Interrupt> for Error {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => Error::Cancelled,
            Interrupt::DeadlineExpired => Error::Timeout,
        }
    }
}
