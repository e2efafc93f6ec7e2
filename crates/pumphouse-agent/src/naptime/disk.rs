//! Disk usage condition for the filesystem holding the cache.

use std::path::PathBuf;

use async_trait::async_trait;
use sysinfo::Disks;

use super::{NapCondition, NaptimeError};

/// Signals nap time when used bytes on the cache's filesystem meet or
/// exceed a fixed limit.
pub struct DiskPressure {
    limit_bytes: u64,
    path: PathBuf,
}

impl DiskPressure {
    pub fn new(limit_bytes: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            limit_bytes,
            path: path.into(),
        }
    }
}

#[async_trait]
impl NapCondition for DiskPressure {
    fn name(&self) -> &str {
        "disk"
    }

    async fn is_nap_time(&self) -> Result<bool, NaptimeError> {
        let disks = Disks::new_with_refreshed_list();

        // The disk whose mount point is the longest prefix of the cache
        // path is the filesystem the cache lives on.
        let disk = disks
            .list()
            .iter()
            .filter(|disk| self.path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .ok_or_else(|| {
                NaptimeError::Sample(format!(
                    "no filesystem found for '{}'",
                    self.path.display()
                ))
            })?;

        let used = disk.total_space().saturating_sub(disk.available_space());
        if used >= self.limit_bytes {
            tracing::warn!(used, limit = self.limit_bytes, "disk usage over limit");
            return Ok(true);
        }
        Ok(false)
    }
}
