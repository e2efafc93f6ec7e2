//! Event-driven intake bridge.
//!
//! The siphon watches the cache tree for filesystem events and forwards
//! eligible artifacts into the backup executor, so the surveyor and the
//! cistern never reference each other. Object subtrees appear dynamically
//! as discovery runs, so newly created directories get a watch attached on
//! the fly. Before trusting live events, a one-shot drain sweeps the
//! cache's existing top-level entries through the same classification.

use std::path::Path;
use std::sync::Arc;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use pumphouse_cache::{Cache, METADATA_FILE_NAME, RECORD_EXT, STATE_FILE_NAME};

use crate::cistern::Cistern;
use crate::config::SiphonConfig;
use crate::error::Result;

const EVENT_QUEUE_CAPACITY: usize = 256;

/// What a touched cache path is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Metadata,
    Record,
    State,
    Unknown,
}

/// Classify a cache path by its final segment.
pub fn classify(path: &str) -> CacheKind {
    let file = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path);

    if file == METADATA_FILE_NAME {
        return CacheKind::Metadata;
    }
    if Path::new(file).extension().and_then(|ext| ext.to_str()) == Some(RECORD_EXT) {
        return CacheKind::Record;
    }
    if file == STATE_FILE_NAME {
        return CacheKind::State;
    }
    CacheKind::Unknown
}

pub struct Siphon {
    cache: Cache,
    cistern: Arc<Cistern>,
    drain_on_start: bool,
}

impl Siphon {
    pub fn new(cache: Cache, cistern: Arc<Cistern>, config: &SiphonConfig) -> Self {
        Self {
            cache,
            cistern,
            drain_on_start: config.drain_on_start,
        }
    }

    /// Attach the watcher to the cache root and start the event loop.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> Result<JoinHandle<()>> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                // The watcher runs on its own thread; a full queue drops
                // the event rather than blocking notify's callback.
                if let Err(e) = event_tx.blocking_send(result) {
                    tracing::warn!(error = %e, "cache event dropped, event loop gone");
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(self.cache.base_dir(), RecursiveMode::NonRecursive)?;

        tracing::info!(dir = %self.cache.base_dir().display(), "siphon watching cache");
        Ok(tokio::spawn(self.run(watcher, event_rx, shutdown)))
    }

    async fn run(
        self,
        mut watcher: RecommendedWatcher,
        mut events: mpsc::Receiver<notify::Result<Event>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if self.drain_on_start {
            if let Err(e) = self.drain(&mut watcher).await {
                tracing::error!(error = %e, "startup drain failed");
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("siphon stopped");
                        return;
                    }
                }
                event = events.recv() => match event {
                    Some(Ok(event)) => self.handle_event(&mut watcher, event).await,
                    Some(Err(e)) => tracing::warn!(error = %e, "cache watch error"),
                    None => return,
                },
            }
        }
    }

    /// One-shot sweep of existing cache contents through the same
    /// classify/forward logic as live events.
    async fn drain(&self, watcher: &mut RecommendedWatcher) -> Result<()> {
        let listing = self.cache.flush().await?;
        tracing::info!(entries = listing.len(), "draining existing cache entries");
        for entry in listing {
            self.handle_created(watcher, &entry.path).await;
        }
        Ok(())
    }

    async fn handle_event(&self, watcher: &mut RecommendedWatcher, event: Event) {
        for path in &event.paths {
            let Some(key) = self.relative_key(path) else {
                tracing::debug!(path = %path.display(), "event outside cache namespace ignored");
                continue;
            };

            match event.kind {
                EventKind::Create(_) => self.handle_created(watcher, &key).await,
                EventKind::Remove(_) => self.handle_removed(watcher, &key).await,
                EventKind::Modify(ModifyKind::Name(_)) => {
                    tracing::debug!(key, "rename in cache detected");
                }
                EventKind::Modify(_) => {
                    tracing::debug!(key, "write to cache detected");
                }
                _ => tracing::debug!(key, kind = ?event.kind, "cache event ignored"),
            }
        }
    }

    /// First appearance of a complete artifact is the only trigger for
    /// forwarding; state files are surveyor-internal and never backed up.
    async fn handle_created(&self, watcher: &mut RecommendedWatcher, key: &str) {
        match classify(key) {
            CacheKind::State => {}
            CacheKind::Record | CacheKind::Metadata => self.intake(key).await,
            CacheKind::Unknown => {
                match self.cache.stat(key).await {
                    Ok(info) if info.is_dir => {
                        // The cache tree grows one subtree per object, so
                        // new directories must be observed dynamically.
                        let absolute = self.cache.base_dir().join(key);
                        match watcher.watch(&absolute, RecursiveMode::Recursive) {
                            Ok(()) => tracing::debug!(key, "watch attached to cache directory"),
                            Err(e) => {
                                tracing::error!(key, error = %e, "unable to attach watch to directory")
                            }
                        }
                    }
                    Ok(_) => tracing::debug!(key, "skipping unknown cache entry"),
                    Err(e) => tracing::warn!(key, error = %e, "unable to stat created cache entry"),
                }
            }
        }
    }

    /// Removal is idempotent cleanup: events race the executor's own
    /// post-backup deletion, so deleting an already-deleted entry is fine.
    async fn handle_removed(&self, watcher: &mut RecommendedWatcher, key: &str) {
        match classify(key) {
            CacheKind::State | CacheKind::Record | CacheKind::Metadata => {
                match self.cache.delete_file(key).await {
                    Ok(()) => tracing::debug!(key, "cache entry removed"),
                    Err(e) => tracing::error!(key, error = %e, "unable to remove cache entry"),
                }
            }
            CacheKind::Unknown => {
                // Most likely a directory whose watch should drop with it.
                let absolute = self.cache.base_dir().join(key);
                if watcher.unwatch(&absolute).is_ok() {
                    tracing::debug!(key, "watch removed from cache directory");
                } else {
                    tracing::warn!(key, "cannot remove unknown cache entry");
                }
            }
        }
    }

    async fn intake(&self, key: &str) {
        tracing::debug!(key, "siphoning to cistern");
        if let Err(e) = self.cistern.store_data(key, Vec::new()).await {
            tracing::error!(key, error = %e, "intake failed");
        }
    }

    fn relative_key(&self, path: &Path) -> Option<String> {
        path.strip_prefix(self.cache.base_dir())
            .ok()
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
    }
}
