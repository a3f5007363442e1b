//! Error types for instantly-client.

use thiserror::Error;

/// Errors that can occur when talking to the Instantly API.
#[derive(Debug, Error)]
pub enum InstantlyError {
    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The API answered with a non-success status.
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The API asked us to slow down (HTTP 429).
    #[error("Rate limited by Instantly API")]
    RateLimited,

    /// Invalid or missing configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl InstantlyError {
    /// HTTP status code associated with the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            InstantlyError::Status { status, .. } => Some(*status),
            InstantlyError::RateLimited => Some(429),
            InstantlyError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether retrying the same request could succeed.
    ///
    /// Rate limits, transport failures and 5xx responses are transient;
    /// other 4xx responses and decoding errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            InstantlyError::RateLimited => true,
            InstantlyError::Http(e) => !e.is_decode() && !e.is_builder(),
            InstantlyError::Status { status, .. } => *status >= 500,
            InstantlyError::Json(_) | InstantlyError::Config(_) => false,
        }
    }
}
