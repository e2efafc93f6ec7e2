use thiserror::Error;

/// Errors surfaced by remote API client implementations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connection, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote API rejected the request.
    #[error("remote API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The named object or job does not exist remotely.
    #[error("remote object not found: '{0}'")]
    NotFound(String),

    /// Malformed response payload.
    #[error("response decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result type alias for remote API operations.
pub type Result<T> = std::result::Result<T, ClientError>;
