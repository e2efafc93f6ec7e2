//! Offline pipeline drill.
//!
//! Runs the full orchestration pipeline against a scripted remote and an
//! in-memory backup store, validating configuration, cache layout, and the
//! intake path without touching production systems. Useful as a smoke
//! check on a new host before pointing the agent at real credentials.
//!
//! ```bash
//! pumphouse-drill --config pumphouse.toml
//! RUST_LOG=debug pumphouse-drill --seconds 10
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use pumphouse_agent::{app, Config};
use pumphouse_backup::memory::MemoryStore;
use pumphouse_backup::BackupStore;
use pumphouse_client::scripted::{ScriptedClient, ScriptedObject, ScriptedPage};
use pumphouse_client::{FieldSchema, ObjectSchema};

#[derive(Parser)]
#[command(name = "pumphouse-drill", about = "Run the backup pipeline offline")]
struct Args {
    /// Configuration file (defaults apply when omitted).
    #[arg(long)]
    config: Option<PathBuf>,

    /// How long to let the pipeline run.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path).context("loading configuration")?,
        None => Config::default(),
    };

    // Keep the drill self-contained under a scratch directory unless the
    // operator pointed base_dir somewhere explicitly.
    let scratch = std::env::temp_dir().join(format!("pumphouse-drill-{}", std::process::id()));
    if args.config.is_none() {
        config.base_dir = scratch.join("cache");
    }

    let client = Arc::new(ScriptedClient::new("drill-user"));
    client.add_object(sample_object());

    let store = Arc::new(MemoryStore::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(app::run(
        config,
        client.clone(),
        Arc::clone(&store) as Arc<dyn BackupStore>,
        shutdown_rx,
    ));

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.seconds)) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }
    let _ = shutdown_tx.send(true);
    runner.await?.context("pipeline run")?;

    let batches = store.batches();
    let files: usize = batches.iter().map(|b| b.paths.len()).sum();
    println!("drill complete: {} batches, {} files backed up", batches.len(), files);
    println!(
        "remote calls: {} export jobs created, {} deleted",
        client.created_queries().len(),
        client.deleted_jobs().len()
    );

    let _ = std::fs::remove_dir_all(&scratch);
    Ok(())
}

fn sample_object() -> ScriptedObject {
    ScriptedObject {
        schema: ObjectSchema {
            name: "Account".into(),
            queryable: true,
            fields: vec![
                FieldSchema {
                    name: "Id".into(),
                    field_type: "id".into(),
                },
                FieldSchema {
                    name: "Name".into(),
                    field_type: "string".into(),
                },
            ],
        },
        pages: vec![
            ScriptedPage {
                records: 2,
                next_locator: "L1".into(),
                data: Bytes::from_static(b"Id,Name\n001,Alpha\n002,Beta\n"),
            },
            ScriptedPage {
                records: 1,
                next_locator: "null".into(),
                data: Bytes::from_static(b"Id,Name\n003,Gamma\n"),
            },
        ],
    }
}
