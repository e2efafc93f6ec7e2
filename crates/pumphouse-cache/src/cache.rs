//! The cache facade shared by every pipeline component.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::{CacheError, Result};
use crate::namespace::{EntryInfo, Namespace};
use crate::split::{self, SplitOptions};
use crate::state::{run_state_actor, StateCommand};
use crate::RECORD_EXT;

/// Capacity of the state actor's command queue. Producers sending faster
/// than the actor can persist block here, which is the backpressure the
/// pipeline relies on instead of unbounded buffering.
pub const STATE_QUEUE_CAPACITY: usize = 64;

/// Durable namespaced key/value and file surface.
///
/// Cloning is cheap; all clones share the namespace and the single state
/// writer.
#[derive(Clone)]
pub struct Cache {
    ns: Arc<Namespace>,
    state_tx: mpsc::Sender<StateCommand>,
}

impl Cache {
    /// Open a cache rooted at `dir`.
    ///
    /// `read_ttl` enables the in-memory read-through layer in front of the
    /// durable namespace. An unwritable root is a hard error: the pipeline
    /// cannot run without durable state.
    pub async fn new(dir: impl Into<PathBuf>, read_ttl: Option<Duration>) -> Result<Self> {
        let ns = Arc::new(Namespace::open(dir.into(), read_ttl).await?);
        let (state_tx, state_rx) = mpsc::channel(STATE_QUEUE_CAPACITY);
        tokio::spawn(run_state_actor(Arc::clone(&ns), state_rx));
        Ok(Self { ns, state_tx })
    }

    /// Absolute path of the namespace root.
    pub fn base_dir(&self) -> &Path {
        self.ns.root()
    }

    /// Whether `key` exists. Any I/O error is logged and treated as absent,
    /// failing safe toward a re-fetch rather than a false hit.
    pub async fn exists(&self, key: &str) -> bool {
        match self.ns.exists(key).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::error!(key, error = %e, "unable to check cache path, assuming absent");
                false
            }
        }
    }

    /// Read the bytes stored at `key`. Errors are logged and reported as a
    /// miss so callers re-set rather than trust stale state.
    pub async fn get_state(&self, key: &str) -> Option<Bytes> {
        match self.ns.read(key).await {
            Ok(data) => Some(data),
            Err(CacheError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "error reading cache state, treating as miss");
                None
            }
        }
    }

    /// Queue a state write at the *derived* state path for `key`.
    pub async fn set_state(&self, key: &str, data: Bytes) -> Result<()> {
        self.send(StateCommand::Update {
            key: key.to_string(),
            data,
            with_name: false,
        })
        .await
    }

    /// Queue a state write verbatim at `key`.
    pub async fn set_state_with_name(&self, key: &str, data: Bytes) -> Result<()> {
        self.send(StateCommand::Update {
            key: key.to_string(),
            data,
            with_name: true,
        })
        .await
    }

    /// Queue removal of the state file derived from `key`.
    pub async fn clear_state(&self, key: &str) -> Result<()> {
        self.send(StateCommand::Clear {
            key: key.to_string(),
        })
        .await
    }

    /// Wait until every previously queued state mutation has been applied.
    pub async fn sync_state(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(StateCommand::Sync(ack_tx)).await?;
        ack_rx.await.map_err(|_| CacheError::WriterClosed)
    }

    /// All paths in the namespace whose final segment equals `name`.
    /// Used to recover in-flight job state after a restart.
    pub async fn find_all(&self, name: &str) -> Vec<String> {
        self.ns
            .walk_files()
            .await
            .into_iter()
            .filter(|entry| {
                entry
                    .path
                    .rsplit('/')
                    .next()
                    .is_some_and(|file| file == name)
            })
            .map(|entry| entry.path)
            .collect()
    }

    /// Write an artifact verbatim at `key`, creating parents.
    ///
    /// Unlike state writes this is synchronous with the caller: a failed
    /// artifact write must fail the unit of work that produced it.
    pub async fn cache_file(&self, key: &str, data: &[u8]) -> Result<()> {
        self.ns.write(key, data).await?;
        tracing::debug!(key, size = data.len(), "cache file created");
        Ok(())
    }

    /// Parse a CSV payload and, when the split option is set, write each
    /// data row as `<path>.<keyValue>.csv` paired with the header row.
    pub async fn cache_csv(&self, path: &str, data: &[u8], opts: SplitOptions) -> Result<()> {
        if !opts.splitting() {
            return Ok(());
        }

        let rows = split::split_records(data, &opts)?;
        for (key_value, bytes) in rows {
            let record_key = format!("{path}.{key_value}.{RECORD_EXT}");
            self.cache_file(&record_key, &bytes).await?;
        }
        Ok(())
    }

    /// Remove a single cached file. Absence is not an error.
    pub async fn delete_file(&self, key: &str) -> Result<()> {
        self.ns.remove_file(key).await
    }

    /// Remove a cached subtree. Absence is not an error.
    pub async fn delete_all(&self, key: &str) -> Result<()> {
        self.ns.remove_all(key).await
    }

    /// Top-level listing of the namespace, used by the startup drain.
    pub async fn flush(&self) -> Result<Vec<EntryInfo>> {
        self.ns.list_root().await
    }

    /// Metadata for a single entry.
    pub async fn stat(&self, key: &str) -> Result<EntryInfo> {
        self.ns.stat(key).await
    }

    async fn send(&self, command: StateCommand) -> Result<()> {
        self.state_tx
            .send(command)
            .await
            .map_err(|_| CacheError::WriterClosed)
    }
}
