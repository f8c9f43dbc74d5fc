//! Error types for the chat server and push channel adapters.

/// Errors from the REST chat API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request did not reach the server or the connection broke.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description from the response body, or a generic one.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// The conversation was already claimed by another agent.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl ApiError {
    /// Returns the HTTP status code, if the server produced one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Conflict(_) => Some(409),
            Self::Http(_) | Self::Parse(_) => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Errors from the realtime push channel.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Failed to connect.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Failed to hand a frame to the connection.
    #[error("send failed: {0}")]
    Send(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connection is gone.
    #[error("push channel closed")]
    Closed,
}

/// Result type for chat API operations.
pub type Result<T> = std::result::Result<T, ApiError>;
