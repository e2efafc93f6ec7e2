use thiserror::Error;

/// Errors from the backup store.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The store CLI could not be spawned.
    #[error("unable to spawn backup command: {0}")]
    Spawn(#[from] std::io::Error),

    /// The store CLI exited non-zero.
    #[error("backup command failed (exit {code:?}): {stderr}")]
    Command { code: Option<i32>, stderr: String },

    /// The store produced output we could not decode.
    #[error("unable to decode backup output: {0}")]
    Decode(#[from] serde_json::Error),

    /// A batch was submitted with nothing to back up.
    #[error("empty backup request")]
    EmptyRequest,
}

/// Result type alias for backup store operations.
pub type Result<T> = std::result::Result<T, BackupError>;
