//! Application wiring.
//!
//! Builds the pipeline in dependency order (cache, throttle conditions,
//! surveyor, cistern, siphon), starts the long-lived loops, and parks
//! until the shutdown signal flips. Collaborators (remote client, backup
//! store) are injected so deployments and tests choose their own.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{NaiveDateTime, Utc};
use tokio::sync::watch;

use pumphouse_backup::BackupStore;
use pumphouse_cache::Cache;
use pumphouse_client::RemoteClient;

use crate::cistern::Cistern;
use crate::config::Config;
use crate::error::Result;
use crate::naptime::{CpuPressure, DiskPressure, MemoryPressure, NapCondition, Naptime};
use crate::siphon::Siphon;
use crate::surveyor::Surveyor;

/// Well-known key of the freshness marker.
pub const TODAY_MARKER_KEY: &str = ".today";

/// Marker timestamp layout, a UNIX-date style string.
const TODAY_FORMAT: &str = "%a %b %e %H:%M:%S UTC %Y";

/// Run the full pipeline until `shutdown` flips to `true`.
pub async fn run(
    config: Config,
    client: Arc<dyn RemoteClient>,
    store: Arc<dyn BackupStore>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    // The cache root is the one thing nothing can proceed without.
    let cache = Cache::new(&config.base_dir, Some(config.cache_timeout)).await?;
    refresh_today_marker(&cache).await?;

    if !store.repo_exists().await {
        tracing::info!("backup repository missing, initializing");
        store.init_repo().await?;
    }

    let conditions: Vec<Box<dyn NapCondition>> = vec![
        Box::new(CpuPressure::new(config.naptime.max_cpu_percent)),
        Box::new(MemoryPressure::new(config.naptime.max_memory_percent)),
        Box::new(DiskPressure::new(
            config.naptime.max_disk_usage,
            &config.base_dir,
        )),
    ];
    let naptime = Arc::new(Naptime::new(config.naptime.interval, conditions));

    let surveyor = Arc::new(
        Surveyor::new(
            Arc::clone(&client),
            cache.clone(),
            &naptime,
            &config.surveyor,
        )
        .await?,
    );
    let cistern = Cistern::new(cache.clone(), store, &naptime, &config.cistern);
    let siphon = Siphon::new(cache.clone(), cistern, &config.siphon);

    let siphon_handle = siphon.start(shutdown.clone())?;
    surveyor.start(shutdown.clone())?;
    let monitor_handle = Arc::clone(&naptime).monitor();

    // Park until told to stop; the loops hold their own receiver clones.
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }

    naptime.stop();
    let _ = monitor_handle.await;
    let _ = siphon_handle.await;
    cache.sync_state().await?;
    tracing::info!("backup session complete");
    Ok(())
}

/// Rewrite the `.today` marker when it is absent, unparsable, or at least
/// 24 hours old. Other processes use the marker's age to avoid flooding
/// the remote API with back-to-back full sweeps.
///
/// Returns whether the marker was (re)written.
pub async fn refresh_today_marker(cache: &Cache) -> Result<bool> {
    let stale = match cache.get_state(TODAY_MARKER_KEY).await {
        None => true,
        Some(bytes) => {
            let parsed = std::str::from_utf8(&bytes)
                .ok()
                .and_then(|raw| NaiveDateTime::parse_from_str(raw.trim(), TODAY_FORMAT).ok());
            match parsed {
                Some(stamp) => {
                    let age = Utc::now().naive_utc().signed_duration_since(stamp);
                    age >= chrono::Duration::hours(24)
                }
                None => {
                    tracing::warn!("unable to parse freshness marker, assuming stale");
                    true
                }
            }
        }
    };

    if stale {
        let stamp = Utc::now().format(TODAY_FORMAT).to_string();
        cache
            .set_state_with_name(TODAY_MARKER_KEY, Bytes::from(stamp))
            .await?;
        cache.sync_state().await?;
        tracing::info!("freshness marker refreshed");
    }
    Ok(stale)
}
