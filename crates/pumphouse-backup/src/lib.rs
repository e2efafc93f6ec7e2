//! Backup store interface.
//!
//! The pipeline funnels cached artifacts into a deduplicating,
//! content-addressed store. The store itself is an external collaborator;
//! this crate defines the [`BackupStore`] trait the executor is written
//! against and ships the restic-CLI implementation used in production.
//!
//! Re-sending an unchanged path to the store is cheap (content addressing
//! dedupes it), which is what makes the executor's retry-whole-batch
//! strategy safe.

mod error;
pub mod memory;
mod restic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::{BackupError, Result};
pub use restic::{ResticStore, S3Config};

/// Parsed summary of one backup invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupSummary {
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub files_new: Option<u64>,
    #[serde(default)]
    pub files_changed: Option<u64>,
    #[serde(default)]
    pub data_added: Option<u64>,
}

/// One snapshot held by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub time: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A deduplicating, content-addressed backup store.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Back up `paths` as one operation, labeling the snapshot with `tags`.
    async fn backup(&self, paths: &[String], tags: &[String]) -> Result<BackupSummary>;

    /// Whether the repository is initialized and reachable.
    async fn repo_exists(&self) -> bool;

    /// Initialize a fresh repository.
    async fn init_repo(&self) -> Result<()>;

    /// Enumerate snapshots currently held by the store.
    async fn list_snapshots(&self) -> Result<Vec<Snapshot>>;
}
