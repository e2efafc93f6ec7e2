//! Restic CLI wrapper over an S3 repository.

use serde::Deserialize;
use tokio::process::Command;

use crate::error::{BackupError, Result};
use crate::{BackupStore, BackupSummary, Snapshot};

const CMD: &str = "restic";
const CMD_BACKUP: &str = "backup";
const CMD_INIT: &str = "init";
const CMD_SNAPSHOTS: &str = "snapshots";
const ARG_REPO: &str = "-r";
const ARG_TAG: &str = "--tag";
const ARG_JSON: &str = "--json";

const ENV_PASSWORD: &str = "RESTIC_PASSWORD";
const ENV_ACCESS_KEY: &str = "AWS_ACCESS_KEY_ID";
const ENV_SECRET: &str = "AWS_SECRET_ACCESS_KEY";

/// S3 connection settings for the restic repository.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Config {
    pub url: String,
    pub bucket_path: String,
    pub restic_password: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret: String,
}

impl S3Config {
    /// Repository locator in restic's `s3:<url>/<bucket>` form.
    pub fn repo(&self) -> String {
        format!("s3:{}/{}", self.url, self.bucket_path)
    }
}

/// [`BackupStore`] implementation driving the restic CLI.
pub struct ResticStore {
    repo: String,
    env: Vec<(String, String)>,
}

impl ResticStore {
    pub fn new(config: &S3Config) -> Self {
        let env = vec![
            (ENV_PASSWORD.to_string(), config.restic_password.clone()),
            (ENV_ACCESS_KEY.to_string(), config.access_key.clone()),
            (ENV_SECRET.to_string(), config.secret.clone()),
        ];
        Self {
            repo: config.repo(),
            env,
        }
    }

    /// Connect to the repository, initializing it on first use.
    pub async fn connect(config: &S3Config) -> Result<Self> {
        let store = Self::new(config);
        if store.repo_exists().await {
            tracing::info!(repo = %store.repo, "backup repository found");
        } else {
            tracing::info!(repo = %store.repo, "backup repository missing, initializing");
            store.init_repo().await?;
        }
        Ok(store)
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        let output = Command::new(CMD)
            .arg(ARG_REPO)
            .arg(&self.repo)
            .args(args)
            .arg(ARG_JSON)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            return Err(BackupError::Command {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        tracing::debug!(args = ?args, "backup command done");
        Ok(stdout)
    }
}

#[async_trait::async_trait]
impl BackupStore for ResticStore {
    async fn backup(&self, paths: &[String], tags: &[String]) -> Result<BackupSummary> {
        let args = backup_args(paths, tags)?;
        let stdout = self.run(&args).await?;
        Ok(parse_backup_summary(&stdout))
    }

    async fn repo_exists(&self) -> bool {
        // restic exits non-zero for a missing or locked repo; either way the
        // caller should attempt init rather than trust it.
        self.run(&[CMD_SNAPSHOTS.to_string()]).await.is_ok()
    }

    async fn init_repo(&self) -> Result<()> {
        self.run(&[CMD_INIT.to_string()]).await?;
        Ok(())
    }

    async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let stdout = self.run(&[CMD_SNAPSHOTS.to_string()]).await?;
        parse_snapshots(&stdout)
    }
}

/// Assemble `backup --tag t ... <paths...>`.
fn backup_args(paths: &[String], tags: &[String]) -> Result<Vec<String>> {
    if paths.is_empty() {
        return Err(BackupError::EmptyRequest);
    }
    let mut args = vec![CMD_BACKUP.to_string()];
    for tag in tags {
        args.push(ARG_TAG.to_string());
        args.push(tag.clone());
    }
    args.extend(paths.iter().cloned());
    Ok(args)
}

/// Restic streams JSON lines; the summary is the line tagged
/// `"message_type":"summary"`. Absence is not an error; older versions
/// print nothing for empty backups.
fn parse_backup_summary(stdout: &str) -> BackupSummary {
    for line in stdout.lines().rev() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if value.get("message_type").and_then(|v| v.as_str()) == Some("summary") {
            if let Ok(summary) = serde_json::from_value(value) {
                return summary;
            }
        }
    }
    BackupSummary::default()
}

fn parse_snapshots(stdout: &str) -> Result<Vec<Snapshot>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}
