use thiserror::Error;

/// Errors raised by the orchestration plane.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("cache error: {0}")]
    Cache(#[from] pumphouse_cache::CacheError),

    #[error("remote client error: {0}")]
    Client(#[from] pumphouse_client::ClientError),

    #[error("backup store error: {0}")]
    Backup(#[from] pumphouse_backup::BackupError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("worker pool unavailable: {0}")]
    Pool(String),

    #[error("component already started: {0}")]
    AlreadyStarted(&'static str),
}

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, AgentError>;
