//! Discovery/export state machine.
//!
//! The surveyor drives the remote bulk API end to end: it enumerates
//! object types, captures their schemas, issues export jobs under a daily
//! quota, pages through results, and persists per-job progress so an
//! interrupted export resumes at its last locator after a restart.
//!
//! A job moves through `parked (quota) → requested → paging → cleaned`,
//! with its [`RecordsState`] persisted after every transition. Two bounded
//! pools (metadata capture, CSV caching) are registered with the throttle
//! controller; pausing them stalls task execution but not the polling
//! loop, so locators keep advancing and the workers catch up on resume.

mod metadata;
mod records;

use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

use pumphouse_cache::{Cache, STATE_FILE_NAME};
use pumphouse_client::{locator_finished, RemoteClient};

use crate::config::SurveyorConfig;
use crate::error::{AgentError, Result};
use crate::naptime::Naptime;
use crate::pool::WorkerPool;

use records::CacheRecordsTask;

pub use records::RecordsState;

/// Well-known key of the process-wide surveyor state blob.
pub const SURVEYOR_STATE_KEY: &str = ".surveyor";

const REQUEST_QUEUE_CAPACITY: usize = 32;
const METADATA_QUEUE_CAPACITY: usize = 64;
const RECORDS_QUEUE_CAPACITY: usize = 64;

/// Outcome of an export request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A remote job was created and the daily counter bumped.
    Submitted,
    /// The daily quota is exhausted; the query was parked for a later run.
    Parked,
}

/// Counters persisted across restarts to enforce the daily quota.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct SurveyorCounters {
    #[serde(rename = "NumRecordsRequests")]
    num_records_requests: u64,
}

struct Inbox {
    records_rx: mpsc::Receiver<String>,
    fetch_rx: mpsc::Receiver<RecordsState>,
}

pub struct Surveyor {
    client: Arc<dyn RemoteClient>,
    cache: Cache,
    settings: Arc<RwLock<SurveyorConfig>>,
    counters: AsyncMutex<SurveyorCounters>,
    records_tx: mpsc::Sender<String>,
    fetch_tx: mpsc::Sender<RecordsState>,
    inbox: Mutex<Option<Inbox>>,
    metadata_pool: WorkerPool<String, ()>,
    records_pool: WorkerPool<CacheRecordsTask, ()>,
}

impl Surveyor {
    /// Build a surveyor and register its worker pools with the throttle
    /// controller. Reloads the persisted daily counter from the cache.
    pub async fn new(
        client: Arc<dyn RemoteClient>,
        cache: Cache,
        naptime: &Naptime,
        config: &SurveyorConfig,
    ) -> Result<Self> {
        let settings = Arc::new(RwLock::new(config.clone()));
        let (records_tx, records_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let (fetch_tx, fetch_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);

        let metadata_pool = {
            let client = Arc::clone(&client);
            let cache = cache.clone();
            let settings = Arc::clone(&settings);
            let records_tx = records_tx.clone();
            WorkerPool::new(
                "surveyor-metadata",
                config.max_metadata_workers,
                METADATA_QUEUE_CAPACITY,
                move |object: String| {
                    metadata::record_metadata(
                        Arc::clone(&client),
                        cache.clone(),
                        Arc::clone(&settings),
                        records_tx.clone(),
                        object,
                    )
                },
            )
        };

        let records_pool = {
            let cache = cache.clone();
            WorkerPool::new(
                "surveyor-records",
                config.max_record_workers,
                RECORDS_QUEUE_CAPACITY,
                move |task: CacheRecordsTask| records::cache_records(cache.clone(), task),
            )
        };

        naptime.add_worker_pool(metadata_pool.controller());
        naptime.add_worker_pool(records_pool.controller());

        let counters = load_counters(&cache).await;

        Ok(Self {
            client,
            cache,
            settings,
            counters: AsyncMutex::new(counters),
            records_tx,
            fetch_tx,
            inbox: Mutex::new(Some(Inbox {
                records_rx,
                fetch_rx,
            })),
            metadata_pool,
            records_pool,
        })
    }

    /// Start the dispatch loop, the completion watcher, startup recovery,
    /// and the metadata sweep.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let inbox = self
            .inbox
            .lock()
            .unwrap()
            .take()
            .ok_or(AgentError::AlreadyStarted("surveyor"))?;

        tracing::info!("starting surveyor");
        tokio::spawn(Arc::clone(&self).dispatch(inbox, shutdown.clone()));
        tokio::spawn(Arc::clone(&self).watch_export_jobs(shutdown));

        tokio::spawn(async move {
            self.queue_incomplete_requests().await;
            if let Err(e) = self.discover_metadata().await {
                tracing::error!(error = %e, "metadata discovery failed");
            }
        });

        Ok(())
    }

    /// Replace the runtime-tunable settings (quota ceiling, check
    /// interval, last-modified window). Worker counts are fixed at
    /// construction.
    pub fn apply_settings(&self, config: &SurveyorConfig) {
        *self.settings.write().unwrap() = config.clone();
        tracing::info!("surveyor settings updated");
    }

    /// Serial dispatch over the request and fetch channels.
    async fn dispatch(
        self: Arc<Self>,
        inbox: Inbox,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Inbox {
            mut records_rx,
            mut fetch_rx,
        } = inbox;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("surveyor dispatch stopped");
                        return;
                    }
                }
                Some(query) = records_rx.recv() => {
                    if let Err(e) = self.request_records(&query).await {
                        tracing::error!(error = %e, "unable to complete records request");
                    }
                }
                Some(state) = fetch_rx.recv() => {
                    self.fetch_records(state).await;
                }
                else => return,
            }
        }
    }

    /// Issue one export job, or park the query when the daily quota is
    /// exhausted. Parking is not an error: the job re-enters through
    /// startup recovery on a later run.
    pub async fn request_records(&self, query: &str) -> Result<RequestOutcome> {
        let quota = self.settings.read().unwrap().max_daily_records_requests;
        let mut counters = self.counters.lock().await;

        if counters.num_records_requests >= quota {
            tracing::warn!(quota, "max number of daily records requests reached");
            records::set_record_state(&self.cache, &RecordsState::parked(query)).await?;
            tracing::debug!(query, "export query parked");
            return Ok(RequestOutcome::Parked);
        }

        let job = self.client.create_export_job(query).await?;
        tracing::info!(
            job = %job.id,
            object = %job.object,
            created = %job.created_date,
            "export job created"
        );

        let state = RecordsState::for_remote_job(&job.id, &job.object);
        records::set_record_state(&self.cache, &state).await?;

        counters.num_records_requests += 1;
        self.persist_counters(&counters).await;
        Ok(RequestOutcome::Submitted)
    }

    /// Page through one export job's results until the remote side signals
    /// the final page, persisting the locator after every chunk.
    pub async fn fetch_records(&self, mut state: RecordsState) {
        loop {
            let results = match self.client.get_export_results(&state.request_id).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::error!(
                        job = %state.request_id,
                        error = %e,
                        "unable to fetch export results, leaving job for the watcher"
                    );
                    return;
                }
            };
            tracing::debug!(
                job = %results.job_id,
                records = results.number_of_records,
                locator = %results.next_locator,
                "records chunk received"
            );

            if results.number_of_records == 0 {
                tracing::warn!(job = %state.request_id, "no results found for export job");
                self.cleanup_records(&state).await;
                break;
            }

            let task = CacheRecordsTask {
                object_id: state.object_id.clone(),
                data: results.data,
            };
            if let Err(e) = self.records_pool.submit(task).await {
                tracing::error!(error = %e, "unable to queue records caching task");
            }

            state.next_locator = results.next_locator.clone();
            if let Err(e) = records::set_record_state(&self.cache, &state).await {
                tracing::error!(error = %e, "unable to persist records state");
            }

            // The wire format sends the string "null" for the final page.
            if locator_finished(&results.next_locator) {
                self.cleanup_records(&state).await;
                break;
            }
        }
        tracing::info!(job = %state.request_id, object = %state.object_id, "done fetching records");
    }

    /// Tear down a drained job: delete it remotely and wipe its local
    /// subtree. A job whose subtree is already gone is a no-op.
    pub async fn cleanup_records(&self, state: &RecordsState) {
        let cache_path = if state.cache_path.is_empty() {
            state.object_id.as_str()
        } else {
            state.cache_path.as_str()
        };

        if !self.cache.exists(cache_path).await {
            tracing::warn!(
                job = %state.request_id,
                path = %cache_path,
                "no records cache to clean, moving on"
            );
            return;
        }

        match self.client.delete_job(&state.request_id).await {
            Ok(()) => tracing::info!(job = %state.request_id, "export job deleted"),
            Err(e) => {
                tracing::error!(job = %state.request_id, error = %e, "unable to delete export job")
            }
        }

        match self.cache.delete_all(cache_path).await {
            Ok(()) => tracing::info!(path = %cache_path, "records cache deleted"),
            Err(e) => tracing::error!(path = %cache_path, error = %e, "unable to delete records cache"),
        }
    }

    /// Startup recovery: find every persisted `.state`, order by priority
    /// (done first, then the lexicographically greatest locator), and
    /// replay each job onto the request or fetch path.
    pub async fn queue_incomplete_requests(&self) {
        let paths = self.cache.find_all(STATE_FILE_NAME).await;
        if paths.is_empty() {
            tracing::warn!("no incomplete records requests found");
            return;
        }
        tracing::info!(count = paths.len(), "incomplete records requests found");

        let mut states = Vec::with_capacity(paths.len());
        for path in &paths {
            states.push(records::get_record_state(&self.cache, path).await);
        }
        records::priority_sort(&mut states);

        for state in states {
            let sent = if state.request_id.is_empty() && !state.query.is_empty() {
                self.records_tx.send(state.query).await.is_ok()
            } else {
                self.fetch_tx.send(state).await.is_ok()
            };
            if !sent {
                tracing::warn!("dispatch channels closed, abandoning recovery replay");
                return;
            }
        }
    }

    /// Background watcher: poll the remote job listing and push any job
    /// reported complete onto the fetch path. Covers completions missed
    /// between request and first fetch (e.g. across a restart).
    async fn watch_export_jobs(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let interval = self.settings.read().unwrap().job_check_interval;
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::debug!("export job watcher stopped");
                        return;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    let jobs = match self.client.list_jobs(self.client.user_id()).await {
                        Ok(jobs) => jobs,
                        Err(e) => {
                            tracing::error!(error = %e, "unable to list export jobs");
                            continue;
                        }
                    };
                    for job in jobs.into_iter().filter(|job| job.complete()) {
                        tracing::debug!(job = %job.id, object = %job.object, "completed export job found");
                        let state = RecordsState::for_remote_job(&job.id, &job.object);
                        if self.fetch_tx.send(state).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn persist_counters(&self, counters: &SurveyorCounters) {
        let data = match serde_json::to_vec(counters) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, "unable to encode surveyor state");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .set_state_with_name(SURVEYOR_STATE_KEY, data.into())
            .await
        {
            tracing::error!(error = %e, "unable to persist surveyor state");
        }
    }
}

async fn load_counters(cache: &Cache) -> SurveyorCounters {
    match cache.get_state(SURVEYOR_STATE_KEY).await {
        Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::error!(error = %e, "unable to decode surveyor state, starting fresh");
            SurveyorCounters::default()
        }),
        None => {
            tracing::warn!("surveyor state not found, assuming no previous state exists");
            SurveyorCounters::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;

    use pumphouse_client::scripted::{ScriptedClient, ScriptedObject, ScriptedPage};
    use pumphouse_client::{FieldSchema, ObjectSchema};

    fn scripted_account(pages: Vec<ScriptedPage>) -> ScriptedObject {
        ScriptedObject {
            schema: ObjectSchema {
                name: "Account".into(),
                queryable: true,
                fields: vec![FieldSchema {
                    name: "Id".into(),
                    field_type: "id".into(),
                }],
            },
            pages,
        }
    }

    fn page(records: u64, locator: &str, data: &'static [u8]) -> ScriptedPage {
        ScriptedPage {
            records,
            next_locator: locator.to_string(),
            data: Bytes::from_static(data),
        }
    }

    async fn build(
        client: Arc<ScriptedClient>,
        config: SurveyorConfig,
    ) -> (tempfile::TempDir, Cache, Arc<Surveyor>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path(), None).await.unwrap();
        let naptime = Naptime::new(Duration::from_secs(3600), Vec::new());
        let surveyor = Surveyor::new(client, cache.clone(), &naptime, &config)
            .await
            .unwrap();
        (dir, cache, Arc::new(surveyor))
    }

    async fn wait_until<F, Fut>(what: &str, mut probe: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !probe().await {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    #[tokio::test]
    async fn pagination_terminates_on_null_locator_with_one_cleanup() {
        let client = Arc::new(ScriptedClient::new("user-1"));
        client.add_object(scripted_account(vec![
            page(1, "L1", b"Id\n001\n"),
            page(1, "L2", b"Id\n002\n"),
            page(1, "null", b"Id\n003\n"),
        ]));

        let (_dir, cache, surveyor) = build(Arc::clone(&client), SurveyorConfig::default()).await;

        let outcome = surveyor
            .request_records("SELECT Id FROM Account")
            .await
            .unwrap();
        assert_eq!(outcome, RequestOutcome::Submitted);
        cache.sync_state().await.unwrap();

        let state = records::get_record_state(&cache, "Account/.state").await;
        surveyor.fetch_records(state).await;

        assert_eq!(client.deleted_jobs().len(), 1, "exactly one cleanup");
        assert!(!cache.exists("Account").await, "state subtree wiped");

        // The three chunks each become per-record files at the top level.
        wait_until("record files cached", || {
            let cache = cache.clone();
            async move {
                cache.exists("Account.001.csv").await
                    && cache.exists("Account.002.csv").await
                    && cache.exists("Account.003.csv").await
            }
        })
        .await;
    }

    #[tokio::test]
    async fn empty_first_page_cleans_up_immediately() {
        let client = Arc::new(ScriptedClient::new("user-1"));
        client.add_object(scripted_account(vec![]));

        let (_dir, cache, surveyor) = build(Arc::clone(&client), SurveyorConfig::default()).await;
        surveyor
            .request_records("SELECT Id FROM Account")
            .await
            .unwrap();
        cache.sync_state().await.unwrap();

        let state = records::get_record_state(&cache, "Account/.state").await;
        surveyor.fetch_records(state).await;
        assert_eq!(client.deleted_jobs().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_of_missing_subtree_is_a_no_op() {
        let client = Arc::new(ScriptedClient::new("user-1"));
        let (_dir, _cache, surveyor) = build(Arc::clone(&client), SurveyorConfig::default()).await;

        let state = RecordsState::for_remote_job("JOB-GONE", "Ghost");
        surveyor.cleanup_records(&state).await;
        assert!(client.deleted_jobs().is_empty(), "no remote teardown without a subtree");
    }

    #[tokio::test]
    async fn quota_exhaustion_parks_the_query() {
        let client = Arc::new(ScriptedClient::new("user-1"));
        client.add_object(scripted_account(vec![]));

        let config = SurveyorConfig {
            max_daily_records_requests: 0,
            ..SurveyorConfig::default()
        };
        let (_dir, cache, surveyor) = build(Arc::clone(&client), config).await;

        let outcome = surveyor
            .request_records("SELECT Id FROM Account")
            .await
            .unwrap();
        assert_eq!(outcome, RequestOutcome::Parked);
        assert!(client.created_queries().is_empty(), "no remote job issued");

        cache.sync_state().await.unwrap();
        let parked = records::get_record_state(&cache, ".state").await;
        assert_eq!(parked.query, "SELECT Id FROM Account");
        assert!(parked.request_id.is_empty());
    }

    #[tokio::test]
    async fn daily_counter_is_durable_across_restarts() {
        let client = Arc::new(ScriptedClient::new("user-1"));
        client.add_object(scripted_account(vec![]));

        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path(), None).await.unwrap();
        let naptime = Naptime::new(Duration::from_secs(3600), Vec::new());

        let config = SurveyorConfig {
            max_daily_records_requests: 1,
            ..SurveyorConfig::default()
        };

        let surveyor = Surveyor::new(Arc::clone(&client) as Arc<dyn RemoteClient>, cache.clone(), &naptime, &config)
            .await
            .unwrap();
        assert_eq!(
            surveyor.request_records("SELECT Id FROM Account").await.unwrap(),
            RequestOutcome::Submitted
        );
        cache.sync_state().await.unwrap();

        // A fresh surveyor over the same cache sees the bumped counter.
        let restarted = Surveyor::new(Arc::clone(&client) as Arc<dyn RemoteClient>, cache.clone(), &naptime, &config)
            .await
            .unwrap();
        assert_eq!(
            restarted.request_records("SELECT Id FROM Account").await.unwrap(),
            RequestOutcome::Parked
        );
    }

    #[tokio::test]
    async fn recovery_resubmits_parked_queries() {
        let client = Arc::new(ScriptedClient::new("user-1"));
        client.add_object(scripted_account(vec![page(1, "null", b"Id\n001\n")]));

        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path(), None).await.unwrap();
        // Seed a parked job from a previous quota-blocked run.
        cache
            .cache_file(
                ".state",
                br#"{"ID":"","RequestID":"","Done":false,"NextLocator":"","CachePath":"","Query":"SELECT Id FROM Account"}"#,
            )
            .await
            .unwrap();

        let naptime = Naptime::new(Duration::from_secs(3600), Vec::new());
        let surveyor = Arc::new(
            Surveyor::new(
                Arc::clone(&client) as Arc<dyn RemoteClient>,
                cache.clone(),
                &naptime,
                &SurveyorConfig::default(),
            )
            .await
            .unwrap(),
        );

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::clone(&surveyor).start(shutdown_rx).unwrap();

        wait_until("parked query resubmission", || {
            let client = Arc::clone(&client);
            async move { !client.created_queries().is_empty() }
        })
        .await;
        assert_eq!(client.created_queries()[0], "SELECT Id FROM Account");
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let client = Arc::new(ScriptedClient::new("user-1"));
        let (_dir, _cache, surveyor) = build(client, SurveyorConfig::default()).await;

        let (_tx, rx) = watch::channel(false);
        Arc::clone(&surveyor).start(rx.clone()).unwrap();
        assert!(matches!(
            Arc::clone(&surveyor).start(rx),
            Err(AgentError::AlreadyStarted("surveyor"))
        ));
    }
}
