//! In-memory backup store double.
//!
//! Records every batch it is handed and can be scripted to fail upcoming
//! calls. Used by the executor tests and the offline drill binary.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{BackupError, Result};
use crate::{BackupStore, BackupSummary, Snapshot};

/// One recorded backup invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBatch {
    pub paths: Vec<String>,
    pub tags: Vec<String>,
}

/// [`BackupStore`] double holding batches in memory.
#[derive(Default)]
pub struct MemoryStore {
    batches: Mutex<Vec<RecordedBatch>>,
    fail_remaining: AtomicUsize,
    initialized: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` backup calls fail.
    pub fn fail_times(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Batches successfully recorded so far, in call order.
    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackupStore for MemoryStore {
    async fn backup(&self, paths: &[String], tags: &[String]) -> Result<BackupSummary> {
        if paths.is_empty() {
            return Err(BackupError::EmptyRequest);
        }
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackupError::Command {
                code: Some(1),
                stderr: "scripted failure".to_string(),
            });
        }

        let mut batches = self.batches.lock().unwrap();
        batches.push(RecordedBatch {
            paths: paths.to_vec(),
            tags: tags.to_vec(),
        });
        Ok(BackupSummary {
            snapshot_id: Some(format!("mem-{}", batches.len())),
            files_new: Some(paths.len() as u64),
            ..Default::default()
        })
    }

    async fn repo_exists(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn init_repo(&self) -> Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let batches = self.batches.lock().unwrap();
        Ok(batches
            .iter()
            .enumerate()
            .map(|(i, batch)| Snapshot {
                id: format!("mem-{}", i + 1),
                time: String::new(),
                paths: batch.paths.clone(),
                tags: batch.tags.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_batches_in_order() {
        let store = MemoryStore::new();
        store.backup(&["a".into()], &[]).await.unwrap();
        store.backup(&["b".into()], &["t".into()]).await.unwrap();

        let batches = store.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].paths, vec!["a"]);
        assert_eq!(batches[1].tags, vec!["t"]);
    }

    #[tokio::test]
    async fn scripted_failures_then_success() {
        let store = MemoryStore::new();
        store.fail_times(2);
        assert!(store.backup(&["a".into()], &[]).await.is_err());
        assert!(store.backup(&["a".into()], &[]).await.is_err());
        assert!(store.backup(&["a".into()], &[]).await.is_ok());
    }

    #[tokio::test]
    async fn init_marks_repo_present() {
        let store = MemoryStore::new();
        assert!(!store.repo_exists().await);
        store.init_repo().await.unwrap();
        assert!(store.repo_exists().await);
    }
}
