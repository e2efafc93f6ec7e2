//! Batching backup executor.
//!
//! Incoming artifact paths accumulate into fixed-size batches. A cut batch
//! is submitted to a bounded worker pool as one backup-store operation; on
//! success every cached artifact in it is deleted, and on failure the
//! whole batch returns to the head of the pending queue. No partial
//! deletion ever happens, so a retried batch re-sends exactly the same
//! paths, which is idempotent as long as the store dedupes unchanged
//! content (a content-addressed store does).

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use pumphouse_backup::{BackupError, BackupStore, BackupSummary};
use pumphouse_cache::Cache;

use crate::config::CisternConfig;
use crate::error::Result;
use crate::naptime::Naptime;
use crate::pool::WorkerPool;

const BATCH_QUEUE_CAPACITY: usize = 8;

/// One artifact queued for backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    /// Cache key of the artifact.
    pub path: String,
    /// Tags to label the snapshot with.
    pub tags: Vec<String>,
}

struct BatchJob {
    requests: Vec<BackupRequest>,
}

pub struct Cistern {
    cache: Cache,
    batch_size: AtomicUsize,
    pending: Mutex<Vec<BackupRequest>>,
    pool: WorkerPool<BatchJob, std::result::Result<BackupSummary, BackupError>>,
}

impl Cistern {
    /// Build the executor and register its pool with the throttle
    /// controller.
    pub fn new(
        cache: Cache,
        store: Arc<dyn BackupStore>,
        naptime: &Naptime,
        config: &CisternConfig,
    ) -> Arc<Self> {
        let base_dir = cache.base_dir().to_path_buf();
        let pool = WorkerPool::new(
            "cistern-backup",
            config.max_workers,
            BATCH_QUEUE_CAPACITY,
            move |job: BatchJob| run_batch(Arc::clone(&store), base_dir.clone(), job),
        );
        naptime.add_worker_pool(pool.controller());

        Arc::new(Self {
            cache,
            batch_size: AtomicUsize::new(config.batch_size),
            pending: Mutex::new(Vec::new()),
            pool,
        })
    }

    /// Append an artifact to the pending queue, cutting a batch once the
    /// configured size is reached. Accumulation is never blocked by a
    /// paused pool; only the cut itself waits on pool capacity.
    pub async fn store_data(&self, path: impl Into<String>, tags: Vec<String>) -> Result<()> {
        let request = BackupRequest {
            path: path.into(),
            tags,
        };
        let ready = {
            let mut pending = self.pending.lock().await;
            pending.push(request);
            pending.len() >= self.batch_size()
        };
        if ready {
            self.cut_batch().await?;
        }
        Ok(())
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::SeqCst)
    }

    /// Number of artifacts accumulated but not yet cut.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub fn apply_settings(&self, config: &CisternConfig) {
        self.batch_size.store(config.batch_size, Ordering::SeqCst);
        tracing::info!(batch_size = config.batch_size, "cistern settings updated");
    }

    /// Cut the leading batch off the pending queue and run it. On failure
    /// the entire batch is prepended back, ahead of newer entries, and the
    /// error surfaces to the caller.
    pub async fn cut_batch(&self) -> Result<()> {
        let batch = {
            let mut pending = self.pending.lock().await;
            let size = self.batch_size().min(pending.len());
            if size == 0 {
                return Ok(());
            }
            let rest = pending.split_off(size);
            std::mem::replace(&mut *pending, rest)
        };
        tracing::debug!(files = batch.len(), "backup batch cut");

        let outcome = self
            .pool
            .process(BatchJob {
                requests: batch.clone(),
            })
            .await;

        match outcome {
            Ok(Ok(summary)) => {
                tracing::info!(
                    files = batch.len(),
                    snapshot = summary.snapshot_id.as_deref().unwrap_or("-"),
                    "backup batch complete"
                );
                self.clean_batch(&batch).await;
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, files = batch.len(), "unable to back up batch, re-queuing");
                self.requeue(batch).await;
                Err(e.into())
            }
            Err(pool_error) => {
                self.requeue(batch).await;
                Err(pool_error)
            }
        }
    }

    async fn requeue(&self, mut batch: Vec<BackupRequest>) {
        let mut pending = self.pending.lock().await;
        batch.extend(pending.drain(..));
        *pending = batch;
    }

    /// Delete every cached artifact of a confirmed batch.
    async fn clean_batch(&self, batch: &[BackupRequest]) {
        for request in batch {
            if let Err(e) = self.cache.delete_file(&request.path).await {
                tracing::error!(path = %request.path, error = %e, "unable to delete cached artifact");
            }
        }
    }
}

/// Pool handler: resolve cache keys to filesystem paths and invoke the
/// store once for the whole batch.
async fn run_batch(
    store: Arc<dyn BackupStore>,
    base_dir: PathBuf,
    job: BatchJob,
) -> std::result::Result<BackupSummary, BackupError> {
    let mut paths = Vec::with_capacity(job.requests.len());
    let mut tags: Vec<String> = Vec::new();
    for request in &job.requests {
        paths.push(base_dir.join(&request.path).display().to_string());
        for tag in &request.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
    }
    store.backup(&paths, &tags).await
}
