//! Error types for Parley.

use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias using the Parley error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Parley.
///
/// The first four variants are the runtime taxonomy every handler boundary
/// reasons about; the rest only surface at startup.
#[derive(Error, Debug)]
pub enum Error {
    /// A user-supplied value was out of its domain
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Markup conversion produced something the platform cannot accept
    #[error("Formatting error: {0}")]
    Formatting(#[from] FormatError),

    /// The model API failed (quota, auth, malformed response, no output)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Every delivery tier for a message chunk failed
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

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

    /// Check if this error should be shown to the user as a corrective hint.
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation(_) => true,
            Self::WithContext { source, .. } => source.is_validation(),
            _ => false,
        }
    }

    /// Check if this error came from the model API.
    pub fn is_upstream(&self) -> bool {
        match self {
            Self::Upstream(_) => true,
            Self::WithContext { source, .. } => source.is_upstream(),
            _ => false,
        }
    }
}

/// Errors raised while converting markdown into platform markup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// A closing tag did not match the innermost open tag
    #[error("Mismatched closing tag </{found}> (expected </{expected}>)")]
    MismatchedTag { expected: String, found: String },

    /// A closing tag appeared with nothing open
    #[error("Unexpected closing tag </{0}>")]
    UnexpectedClose(String),

    /// Output ended with tags still open
    #[error("Unclosed tag <{0}>")]
    Unclosed(String),
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
