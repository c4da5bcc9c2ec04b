//! Error types for llama-relay.

use thiserror::Error;

/// Result type alias using the relay error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for relay services.
#[derive(Error, Debug)]
pub enum Error {
    /// History snapshot could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Caller is not allowed to perform the action
    #[error("Authorization error: {0}")]
    Forbidden(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if this is an authorization error.
    pub fn is_forbidden(&self) -> bool {
        match self {
            Self::Forbidden(_) => true,
            Self::WithContext { source, .. } => source.is_forbidden(),
            _ => false,
        }
    }

    /// Check if this error came from the filesystem or the snapshot format.
    pub fn is_persistence(&self) -> bool {
        match self {
            Self::Persistence(_) | Self::Io(_) | Self::Json(_) => true,
            Self::WithContext { source, .. } => source.is_persistence(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
