//! Export-job progress state and the CSV-caching task.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use pumphouse_cache::{Cache, SplitOptions};

use crate::error::Result;

/// Durable progress of one export job.
///
/// Persisted as JSON under the job's cache subtree after every transition,
/// so a crash resumes at the last recorded locator instead of restarting
/// the export. Field names on disk are fixed; do not rename them without a
/// migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsState {
    /// Object type being exported.
    #[serde(rename = "ID")]
    pub object_id: String,
    /// Remote job id; empty while the job is quota-parked.
    #[serde(rename = "RequestID")]
    pub request_id: String,
    #[serde(rename = "Done")]
    pub done: bool,
    /// Pagination cursor; empty or the literal `"null"` means finished.
    #[serde(rename = "NextLocator")]
    pub next_locator: String,
    /// Cache subtree the job writes under; defaults to the object id.
    #[serde(rename = "CachePath")]
    pub cache_path: String,
    /// The export query, kept so a parked job can be re-submitted.
    #[serde(rename = "Query")]
    pub query: String,
}

impl RecordsState {
    /// A job parked by the daily quota: only the query survives.
    pub fn parked(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// A job known to the remote side (from creation or the job listing).
    pub fn for_remote_job(request_id: impl Into<String>, object: impl Into<String>) -> Self {
        let object = object.into();
        Self {
            object_id: object.clone(),
            request_id: request_id.into(),
            cache_path: object,
            ..Self::default()
        }
    }

    fn normalized(mut self) -> Self {
        if self.cache_path.is_empty() {
            self.cache_path = self.object_id.clone();
        }
        self
    }
}

/// One paged chunk handed to the records worker pool.
#[derive(Debug)]
pub(crate) struct CacheRecordsTask {
    pub object_id: String,
    pub data: Bytes,
}

/// Records-pool handler: split the chunk into one file per record.
pub(crate) async fn cache_records(cache: Cache, task: CacheRecordsTask) {
    let result = cache
        .cache_csv(
            &task.object_id,
            &task.data,
            SplitOptions::new().split_rows(true),
        )
        .await;
    if let Err(e) = result {
        tracing::error!(object = %task.object_id, error = %e, "unable to cache records chunk");
    }
}

/// Decode the state stored at `path`. Missing or damaged state decodes to
/// a fresh default so recovery can still make a call about the job.
pub(crate) async fn get_record_state(cache: &Cache, path: &str) -> RecordsState {
    let state = match cache.get_state(path).await {
        Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!(path, error = %e, "unable to decode records state, starting fresh");
            RecordsState::default()
        }),
        None => RecordsState::default(),
    };
    state.normalized()
}

/// Persist `state` under its cache subtree via the single-writer actor.
pub(crate) async fn set_record_state(cache: &Cache, state: &RecordsState) -> Result<()> {
    let state = state.clone().normalized();
    let data = serde_json::to_vec(&state)?;
    cache.set_state(&state.cache_path, Bytes::from(data)).await?;
    Ok(())
}

/// Order recovered jobs for replay: finished jobs first, then the
/// lexicographically greatest locator.
///
/// Locators are opaque cursors, so string order is not guaranteed to track
/// real progress; this mirrors the long-standing resume behavior rather
/// than asserting anything about cursor structure.
pub(crate) fn priority_sort(states: &mut [RecordsState]) {
    states.sort_by(|a, b| {
        b.done
            .cmp(&a.done)
            .then_with(|| b.next_locator.cmp(&a.next_locator))
    });
}
