use std::fmt;

use archmend_types::ValidationResult;

/// Result type for archmend-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the runtime layer
#[derive(Debug)]
pub enum Error {
    /// Archive stream could not be read
    Loader(archmend_loader::Error),

    /// Persistence layer error
    Store(archmend_store::Error),

    /// Missing or invalid configuration
    Config(String),

    /// Proposed repair failed one or more validation checks
    Validation(ValidationResult),

    /// Baseline archive yielded no messages, only parse errors
    Baseline { parse_errors: usize },

    /// Invalid operation or state
    InvalidOperation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Loader(err) => write!(f, "Loader error: {}", err),
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Validation(result) => write!(
                f,
                "Validation failed: [{}]",
                result.failed_checks().join(", ")
            ),
            Error::Baseline { parse_errors } => write!(
                f,
                "Baseline archive unreadable: {} parse errors and no messages",
                parse_errors
            ),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Loader(err) => Some(err),
            Error::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<archmend_loader::Error> for Error {
    fn from(err: archmend_loader::Error) -> Self {
        Error::Loader(err)
    }
}

impl From<archmend_store::Error> for Error {
    fn from(err: archmend_store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}
