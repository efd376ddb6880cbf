//! Transport error types

use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// A non-retryable error response from the service
///
/// Carries everything the caller needs to diagnose the failure: the HTTP
/// status, the service error code and message when the body was parseable,
/// and the raw body either way.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Service error code (`code` or `errorCode` in the body)
    pub code: Option<String>,
    /// Service message (`message` or `error` in the body)
    pub message: Option<String>,
    /// Raw response body
    pub body: String,
}

impl ApiError {
    /// Build an error from a status and raw body, parsing the service's
    /// code/message fields when the body is JSON
    pub fn from_body(status: u16, body: String) -> Self {
        let mut code = None;
        let mut message = None;
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
            code = value
                .get("code")
                .or_else(|| value.get("errorCode"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            message = value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }
        Self {
            status,
            code,
            message,
            body,
        }
    }

    fn summary(&self) -> &str {
        self.message.as_deref().unwrap_or(&self.body)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "HTTP {} [{}]: {}", self.status, code, self.summary()),
            None => write!(f, "HTTP {}: {}", self.status, self.summary()),
        }
    }
}

/// Errors that can occur in the HTTP transport layer
#[derive(Debug, Error)]
pub enum TransportError {
    /// The service rejected the request with a non-retryable status
    #[error("service returned {0}")]
    Api(ApiError),

    /// Underlying HTTP client error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// All retry attempts exhausted
    #[error("request failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts performed (initial try included)
        attempts: u32,
        /// Last observed error
        last_error: String,
    },

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Authentication collaborator failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A request URL could not be built
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    /// Compressing the request body failed
    #[error("failed to compress request body: {0}")]
    Compress(#[from] std::io::Error),

    /// The response body could not be decoded into the expected shape
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    /// The HTTP status of the underlying API error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(e) => Some(e.status),
            _ => None,
        }
    }
}
