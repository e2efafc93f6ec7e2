//! End-to-end pipeline scenario: a fresh cache, one queryable object with
//! two export pages, drain-driven intake, and single-file backup batches.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;

use pumphouse_agent::app;
use pumphouse_agent::cistern::Cistern;
use pumphouse_agent::config::{CisternConfig, SiphonConfig, SurveyorConfig};
use pumphouse_agent::naptime::Naptime;
use pumphouse_agent::siphon::Siphon;
use pumphouse_agent::surveyor::Surveyor;
use pumphouse_backup::memory::MemoryStore;
use pumphouse_backup::BackupStore;
use pumphouse_cache::Cache;
use pumphouse_client::scripted::{ScriptedClient, ScriptedObject, ScriptedPage};
use pumphouse_client::{FieldSchema, ObjectSchema, RemoteClient};

async fn wait_until<F, Fut>(what: &str, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(15), async {
        while !probe().await {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

fn foo_object() -> ScriptedObject {
    ScriptedObject {
        schema: ObjectSchema {
            name: "Foo".into(),
            queryable: true,
            fields: vec![FieldSchema {
                name: "Id".into(),
                field_type: "id".into(),
            }],
        },
        pages: vec![
            ScriptedPage {
                records: 1,
                next_locator: "L1".into(),
                data: Bytes::from_static(b"Id\nr1\n"),
            },
            ScriptedPage {
                records: 1,
                next_locator: "null".into(),
                data: Bytes::from_static(b"Id\nr2\n"),
            },
        ],
    }
}

#[tokio::test]
async fn fresh_cache_exports_drains_and_backs_up() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::new(dir.path().join("cache"), Some(Duration::from_secs(30)))
        .await
        .unwrap();

    // A fresh cache has no freshness marker; startup writes one.
    assert!(app::refresh_today_marker(&cache).await.unwrap());
    assert!(cache.exists(app::TODAY_MARKER_KEY).await);

    let client = Arc::new(ScriptedClient::new("pipeline-user"));
    client.add_object(foo_object());

    let naptime = Arc::new(Naptime::new(Duration::from_secs(3600), Vec::new()));
    let surveyor_config = SurveyorConfig {
        // Tight check interval so the completion watcher feeds the fetch
        // path promptly.
        job_check_interval: Duration::from_millis(50),
        ..SurveyorConfig::default()
    };
    let surveyor = Arc::new(
        Surveyor::new(
            Arc::clone(&client) as Arc<dyn RemoteClient>,
            cache.clone(),
            &naptime,
            &surveyor_config,
        )
        .await
        .unwrap(),
    );

    let store = Arc::new(MemoryStore::new());
    let cistern = Cistern::new(
        cache.clone(),
        Arc::clone(&store) as Arc<dyn BackupStore>,
        &naptime,
        &CisternConfig {
            batch_size: 1,
            max_workers: 1,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    Arc::clone(&surveyor).start(shutdown_rx.clone()).unwrap();

    // Discovery issues one export job; both pages are split into
    // per-record files, the state subtree is wiped after the "null"
    // locator, and the remote job is torn down exactly once.
    wait_until("export to finish", || {
        let cache = cache.clone();
        let client = Arc::clone(&client);
        async move {
            cache.exists("Foo.r1.csv").await
                && cache.exists("Foo.r2.csv").await
                && !cache.exists("Foo").await
                && client.deleted_jobs().len() == 1
        }
    })
    .await;

    assert_eq!(client.created_queries().len(), 1, "one export job requested");
    cache.sync_state().await.unwrap();
    let counter = cache
        .get_state(pumphouse_agent::surveyor::SURVEYOR_STATE_KEY)
        .await
        .expect("surveyor state persisted");
    assert!(
        std::str::from_utf8(&counter)
            .unwrap()
            .contains("\"NumRecordsRequests\":1"),
        "daily counter durably incremented"
    );

    // The siphon's startup drain forwards the two record files; with
    // batch_size=1 every forward cuts an immediate single-file batch.
    let siphon = Siphon::new(cache.clone(), cistern, &SiphonConfig { drain_on_start: true });
    let siphon_handle = siphon.start(shutdown_rx.clone()).unwrap();

    wait_until("two single-file backups", || {
        let store = Arc::clone(&store);
        async move { store.batches().len() == 2 }
    })
    .await;

    let batches = store.batches();
    assert!(batches.iter().all(|batch| batch.paths.len() == 1));
    let mut backed_up: Vec<String> = batches
        .iter()
        .map(|batch| batch.paths[0].rsplit('/').next().unwrap().to_string())
        .collect();
    backed_up.sort();
    assert_eq!(backed_up, vec!["Foo.r1.csv", "Foo.r2.csv"]);

    // Confirmed artifacts are deleted from the cache.
    wait_until("cache artifacts deleted", || {
        let cache = cache.clone();
        async move { !cache.exists("Foo.r1.csv").await && !cache.exists("Foo.r2.csv").await }
    })
    .await;

    // The marker survives the whole run.
    assert!(cache.exists(app::TODAY_MARKER_KEY).await);

    let _ = shutdown_tx.send(true);
    let _ = siphon_handle.await;
}

#[tokio::test]
async fn full_wiring_runs_under_app_run() {
    let dir = tempfile::tempdir().unwrap();

    let mut config = pumphouse_agent::Config::default();
    config.base_dir = dir.path().join("cache");
    config.surveyor.job_check_interval = Duration::from_millis(50);
    config.cistern.batch_size = 1;
    // Ceilings no real host reaches, so the throttle loop stays quiet.
    config.naptime.max_cpu_percent = 100.0;
    config.naptime.max_memory_percent = 100.0;
    config.naptime.max_disk_usage = u64::MAX;

    let client = Arc::new(ScriptedClient::new("wiring-user"));
    client.add_object(foo_object());
    let store = Arc::new(MemoryStore::new());
    store.init_repo().await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(app::run(
        config,
        Arc::clone(&client) as Arc<dyn RemoteClient>,
        Arc::clone(&store) as Arc<dyn BackupStore>,
        shutdown_rx,
    ));

    wait_until("records backed up through live events", || {
        let store = Arc::clone(&store);
        async move {
            let files: usize = store.batches().iter().map(|b| b.paths.len()).sum();
            files >= 2
        }
    })
    .await;

    let _ = shutdown_tx.send(true);
    runner.await.unwrap().unwrap();
}
