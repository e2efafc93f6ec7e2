use thiserror::Error;

/// Errors that can occur against the cache namespace.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The namespace root could not be created or opened.
    #[error("cache root unavailable at '{path}': {source}")]
    RootUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A key tried to escape the namespace root.
    #[error("invalid cache key '{0}'")]
    InvalidKey(String),

    /// I/O error against the namespace.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed CSV payload.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The state actor is no longer running.
    #[error("state writer is not running")]
    WriterClosed,
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
