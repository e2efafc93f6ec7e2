//! Object metadata discovery.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::mpsc;

use pumphouse_cache::{Cache, METADATA_FILE_NAME};
use pumphouse_client::{export_query, RemoteClient};

use crate::config::SurveyorConfig;
use crate::error::Result;

use super::Surveyor;

impl Surveyor {
    /// Enumerate every object type and fan schema capture out to the
    /// metadata pool. A failure to enumerate skips the sweep (recovery and
    /// the completion watcher still run); per-object failures are handled
    /// inside the pool task.
    pub async fn discover_metadata(&self) -> Result<()> {
        tracing::info!("getting object inventory");
        let summaries = match self.client.describe_all().await {
            Ok(summaries) => summaries,
            Err(e) => {
                tracing::error!(error = %e, "unable to enumerate object types, skipping metadata sweep");
                return Ok(());
            }
        };

        tracing::info!(objects = summaries.len(), "object types found");
        for summary in summaries {
            tracing::debug!(object = %summary.name, "queueing metadata capture");
            if let Err(e) = self.metadata_pool.submit(summary.name).await {
                tracing::error!(error = %e, "unable to queue metadata capture");
            }
        }
        Ok(())
    }
}

/// Metadata-pool handler: fetch one object's schema, cache it, and for
/// queryable types push an export query onto the request channel.
pub(super) async fn record_metadata(
    client: Arc<dyn RemoteClient>,
    cache: Cache,
    settings: Arc<RwLock<SurveyorConfig>>,
    records_tx: mpsc::Sender<String>,
    object: String,
) {
    let schema = match client.describe_one(&object).await {
        Ok(schema) => schema,
        Err(e) => {
            tracing::error!(object = %object, error = %e, "unable to describe object, skipping");
            return;
        }
    };

    let path = format!("{}/{METADATA_FILE_NAME}", schema.name);
    let data = match serde_json::to_vec(&schema) {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(object = %schema.name, error = %e, "unable to encode metadata, skipping");
            return;
        }
    };
    if let Err(e) = cache.cache_file(&path, &data).await {
        tracing::error!(object = %schema.name, error = %e, "unable to cache metadata");
        return;
    }
    tracing::info!(object = %schema.name, "metadata recorded");

    // Only queryable types can be exported.
    if schema.queryable {
        let modified_after = {
            let window = settings.read().unwrap().last_modified_window;
            window
                .and_then(|w| chrono::Duration::from_std(w).ok())
                .map(|w| Utc::now() - w)
        };
        let query = export_query(&schema, modified_after);
        if records_tx.send(query).await.is_err() {
            tracing::warn!(object = %schema.name, "request channel closed, dropping export query");
        }
    }
}
