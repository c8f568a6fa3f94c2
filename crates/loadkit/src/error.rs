//! Error types for Loadkit

use thiserror::Error;

/// Errors that abort a loader run
///
/// "Not modified", "rate limited" and "unchanged" are not errors; they are
/// reported through [`LoadStatus`](crate::types::LoadStatus).
#[derive(Debug, Error)]
pub enum LoadError {
    /// User-supplied options failed validation
    #[error("The configuration provided is invalid. {}", .0.join("\n"))]
    ConfigInvalid(Vec<String>),

    /// No credential available for an API that requires one
    #[error("No {platform} token provided. Please provide a token or set the `{env_var}` environment variable")]
    AuthMissing {
        platform: &'static str,
        env_var: &'static str,
    },

    /// Failed to build HTTP client
    #[error("Failed to create HTTP client")]
    ClientBuild(#[source] reqwest::Error),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Failed to connect to server
    #[error("Failed to connect to server")]
    Connect(#[source] reqwest::Error),

    /// Other transport error
    #[error("Request failed: {0}")]
    Http(String),

    /// Non-success API response
    #[error("API request failed (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Post URI, PR identifier, repository name etc. could not be parsed
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Persistence collaborator failure
    #[error("Store error: {0}")]
    Store(String),
}

impl LoadError {
    /// Create an error from a reqwest error
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LoadError::Timeout
        } else if err.is_connect() {
            LoadError::Connect(err)
        } else if err.is_decode() {
            LoadError::Http(format!("invalid response body: {}", err))
        } else {
            LoadError::Http(err.to_string())
        }
    }

    /// Build a [`LoadError::ConfigInvalid`] from a single message
    pub fn config(message: impl Into<String>) -> Self {
        LoadError::ConfigInvalid(vec![message.into()])
    }
}
