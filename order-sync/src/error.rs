//! Client error types

use thiserror::Error;

/// REST fetch layer error
///
/// Any of these leaves the order cache untouched.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport failure (DNS, connect, timeout, TLS)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Authentication required
    #[error("Authentication required")]
    Unauthorized,

    /// Permission denied
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request rejected as invalid
    #[error("Validation error: {0}")]
    Validation(String),

    /// Any other non-2xx status
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Envelope said `success: false`
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Base URL or path could not be built
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid response format
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for REST operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Push channel error
#[derive(Debug, Error)]
pub enum PushError {
    /// Could not open the connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// Server refused or never acknowledged registration
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// Peer closed the connection
    #[error("Connection closed")]
    Closed,

    /// Frame could not be decoded
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Raw payload could not be turned into a canonical order
#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("order payload is not a JSON object")]
    NotAnObject,

    #[error("order payload has no orderNumber")]
    MissingOrderNumber,

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Session start-up error
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] crate::persist::StorageError),

    #[error(transparent)]
    Push(#[from] PushError),
}
