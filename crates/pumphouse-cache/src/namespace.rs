//! Filesystem namespace behind the cache.
//!
//! A [`Namespace`] is a directory tree addressed by slash-separated relative
//! keys, with an optional TTL'd read-through layer in front of the disk so
//! hot state reads (job progress polled every page) do not hit the
//! filesystem each time. Writes and deletes invalidate the layer, keeping
//! the disk authoritative.

use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::error::{CacheError, Result};

/// Maximum number of entries held by the read-through layer.
const READ_CACHE_ENTRIES: usize = 1024;

/// A single top-level or walked entry of the namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Path relative to the namespace root.
    pub path: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
}

struct CachedRead {
    at: Instant,
    data: Bytes,
}

struct ReadThrough {
    ttl: Duration,
    entries: Mutex<LruCache<String, CachedRead>>,
}

pub(crate) struct Namespace {
    root: PathBuf,
    read_through: Option<ReadThrough>,
}

impl Namespace {
    /// Open (creating if necessary) a namespace rooted at `root`.
    ///
    /// Failure here is fatal to the caller: no component can make forward
    /// progress without a writable cache root.
    pub(crate) async fn open(root: PathBuf, read_ttl: Option<Duration>) -> Result<Self> {
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| CacheError::RootUnavailable {
                path: root.display().to_string(),
                source,
            })?;

        let read_through = read_ttl.map(|ttl| ReadThrough {
            ttl,
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(READ_CACHE_ENTRIES).expect("nonzero capacity"),
            )),
        });

        Ok(Self { root, read_through })
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative key to an absolute path, rejecting escapes.
    pub(crate) fn resolve(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key.trim_start_matches('/'));
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(CacheError::InvalidKey(key.to_string())),
            }
        }
        Ok(self.root.join(rel))
    }

    pub(crate) async fn read(&self, key: &str) -> Result<Bytes> {
        if let Some(layer) = &self.read_through {
            let mut entries = layer.entries.lock().await;
            if let Some(hit) = entries.get(key) {
                if hit.at.elapsed() < layer.ttl {
                    return Ok(hit.data.clone());
                }
                entries.pop(key);
            }
        }

        let path = self.resolve(key)?;
        let data = Bytes::from(tokio::fs::read(&path).await?);

        if let Some(layer) = &self.read_through {
            layer.entries.lock().await.put(
                key.to_string(),
                CachedRead {
                    at: Instant::now(),
                    data: data.clone(),
                },
            );
        }

        Ok(data)
    }

    /// Write `data` at `key`, creating parent directories implicitly.
    pub(crate) async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        self.invalidate(key).await;
        Ok(())
    }

    pub(crate) async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    pub(crate) async fn stat(&self, key: &str) -> Result<EntryInfo> {
        let path = self.resolve(key)?;
        let meta = tokio::fs::metadata(&path).await?;
        Ok(EntryInfo {
            path: key.to_string(),
            is_dir: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
        })
    }

    /// Remove a single file. Absent files are not an error: removal events
    /// can race the backup executor's own post-backup deletion.
    pub(crate) async fn remove_file(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(key, "remove of absent cache file ignored");
            }
            Err(e) => return Err(e.into()),
        }
        self.invalidate(key).await;
        Ok(())
    }

    /// Remove a subtree (or a single file) rooted at `key`.
    pub(crate) async fn remove_all(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        let result = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        };
        result?;
        self.invalidate_all().await;
        Ok(())
    }

    /// Recursively collect every file under the root.
    ///
    /// Per-entry errors (a vanished directory, an unreadable entry) are
    /// logged and skipped so a damaged subtree cannot abort the scan.
    pub(crate) async fn walk_files(&self) -> Vec<EntryInfo> {
        let mut found = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "unable to walk cache directory, skipping");
                    continue;
                }
            };
            loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        match entry.file_type().await {
                            Ok(ft) if ft.is_dir() => stack.push(path),
                            Ok(_) => {
                                if let Some(rel) = self.relative_key(&path) {
                                    let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                                    found.push(EntryInfo {
                                        path: rel,
                                        is_dir: false,
                                        size,
                                    });
                                }
                            }
                            Err(e) => {
                                tracing::warn!(path = %path.display(), error = %e, "unreadable cache entry, skipping");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), error = %e, "error walking cache directory, skipping rest");
                        break;
                    }
                }
            }
        }

        found
    }

    /// List the top-level entries of the namespace.
    pub(crate) async fn list_root(&self) -> Result<Vec<EntryInfo>> {
        let mut listing = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let meta = entry.metadata().await?;
            listing.push(EntryInfo {
                path: name,
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        listing.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listing)
    }

    fn relative_key(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
    }

    async fn invalidate(&self, key: &str) {
        if let Some(layer) = &self.read_through {
            layer.entries.lock().await.pop(key);
        }
    }

    async fn invalidate_all(&self) {
        if let Some(layer) = &self.read_through {
            layer.entries.lock().await.clear();
        }
    }
}
