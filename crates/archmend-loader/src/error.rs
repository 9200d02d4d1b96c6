use std::fmt;

/// Result type for archmend-loader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the loader layer.
///
/// Malformed lines never surface here; they become per-line diagnostics and
/// the stream continues. Only stream-level failures are fatal.
#[derive(Debug)]
pub enum Error {
    /// IO operation failed on the stream itself
    Io(std::io::Error),

    /// JSON serialization failed while writing records back
    Json(serde_json::Error),

    /// Duplicated tool-result volume exceeded the configured guard threshold
    ExcessiveDuplication { total: usize, max: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::ExcessiveDuplication { total, max } => write!(
                f,
                "Excessive duplication: {} duplicated blocks exceed the limit of {}",
                total, max
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::ExcessiveDuplication { .. } => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
