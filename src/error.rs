//! Error types for followgraph
//!
//! Defines one error enum covering every failure mode of the cache stores,
//! the remote client and the acquisition pipeline. Uses thiserror for
//! ergonomic error handling.

use thiserror::Error;

/// Result type alias for followgraph operations
pub type Result<T> = std::result::Result<T, FollowGraphError>;

/// Comprehensive error type for followgraph operations
#[derive(Error, Debug)]
pub enum FollowGraphError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// No identity could be resolved for the current user
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    /// Remote API failure
    ///
    /// `code` carries the non-zero status code embedded in the response body.
    /// It is `None` for transport failures, timeouts and unparsable bodies.
    #[error("Remote error{}: {message}", code_suffix(.code))]
    Remote { code: Option<i64>, message: String },

    /// A cache backend refused the operation (quota, disabled, not opened)
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A persisted cache entry could not be parsed
    #[error("Malformed cache entry {key}: {reason}")]
    MalformedCacheEntry { key: String, reason: String },

    /// The run was cancelled by its consumer. Not a failure.
    #[error("Cancelled")]
    Cancelled,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Anyhow errors (for more context)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

fn code_suffix(code: &Option<i64>) -> String {
    code.map(|c| format!(" ({})", c)).unwrap_or_default()
}

impl FollowGraphError {
    /// Build a remote error carrying an API status code
    pub fn remote(code: i64, message: impl Into<String>) -> Self {
        Self::Remote {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Build a remote error for a transport-level failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Remote {
            code: None,
            message: message.into(),
        }
    }

    /// True if this is the silent cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl crate::api::retry::RetryableError for FollowGraphError {
    fn retry_decision(&self) -> crate::api::retry::RetryDecision {
        use crate::api::retry::RetryDecision;
        use std::time::Duration;

        match self {
            // Transport, timeout and parse failures may be transient
            FollowGraphError::Remote { code: None, .. } => RetryDecision::Retry,
            // The API answered and said no
            FollowGraphError::Remote { code: Some(_), .. } => RetryDecision::NoRetry,
            FollowGraphError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    RetryDecision::Retry
                } else if let Some(status) = e.status() {
                    match status.as_u16() {
                        429 => RetryDecision::RetryAfter(Duration::from_secs(60)),
                        500..=599 => RetryDecision::Retry,
                        _ => RetryDecision::NoRetry,
                    }
                } else {
                    RetryDecision::Retry
                }
            }
            FollowGraphError::Config(_) => RetryDecision::NoRetry,
            FollowGraphError::AuthenticationRequired(_) => RetryDecision::NoRetry,
            FollowGraphError::StorageUnavailable(_) => RetryDecision::NoRetry,
            FollowGraphError::MalformedCacheEntry { .. } => RetryDecision::NoRetry,
            FollowGraphError::Cancelled => RetryDecision::NoRetry,
            FollowGraphError::Io(_) => RetryDecision::NoRetry,
            FollowGraphError::Json(_) => RetryDecision::NoRetry,
            FollowGraphError::Yaml(_) => RetryDecision::NoRetry,
            FollowGraphError::Database(_) => RetryDecision::NoRetry,
            FollowGraphError::Other(_) => RetryDecision::NoRetry,
            FollowGraphError::Anyhow(_) => RetryDecision::NoRetry,
        }
    }
}
