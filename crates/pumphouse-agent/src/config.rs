//! Agent configuration.
//!
//! One [`Config`] is constructed at startup (from a TOML file or defaults)
//! and passed by reference into each component's constructor. Components
//! that support live tuning expose an `apply_settings` method taking the
//! relevant section; nothing reads process-global state.
//!
//! Humanized values are accepted where operators expect them: durations as
//! `"30s"`/`"2m"`, sizes as `"2GB"`, percentages as `"85%"`.

use std::path::PathBuf;
use std::time::Duration;

use bytesize::ByteSize;
use serde::Deserialize;

use pumphouse_backup::S3Config;

use crate::error::{AgentError, Result};

const DEFAULT_BASE_DIR: &str = "pumphouse-cache";
const DEFAULT_CACHE_TIMEOUT: &str = "30s";
const DEFAULT_MONITOR_INTERVAL: &str = "2m";
const DEFAULT_MAX_CPU_PERCENT: &str = "85%";
const DEFAULT_MAX_MEMORY_PERCENT: &str = "85%";
const DEFAULT_MAX_DISK_USAGE: &str = "2GB";
const DEFAULT_JOB_CHECK_INTERVAL: &str = "1m";
const DEFAULT_MAX_DAILY_RECORDS_REQUESTS: u64 = 2000;
const DEFAULT_BATCH_SIZE: usize = 20;

/// Fully parsed agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the cache namespace.
    pub base_dir: PathBuf,
    /// TTL of the read-through layer in front of the cache.
    pub cache_timeout: Duration,
    pub naptime: NaptimeConfig,
    pub surveyor: SurveyorConfig,
    pub cistern: CisternConfig,
    pub siphon: SiphonConfig,
    pub storage: S3Config,
}

#[derive(Debug, Clone)]
pub struct NaptimeConfig {
    /// How often conditions are evaluated.
    pub interval: Duration,
    /// CPU usage ceiling, percent.
    pub max_cpu_percent: f32,
    /// Virtual memory usage ceiling, percent.
    pub max_memory_percent: f32,
    /// Disk used-bytes ceiling for the filesystem holding the cache.
    pub max_disk_usage: u64,
}

#[derive(Debug, Clone)]
pub struct SurveyorConfig {
    /// Workers caching paged CSV results.
    pub max_record_workers: usize,
    /// Workers capturing object metadata.
    pub max_metadata_workers: usize,
    /// Daily ceiling on export-job submissions, enforced across restarts.
    pub max_daily_records_requests: u64,
    /// Only export records modified within this window (None = everything).
    pub last_modified_window: Option<Duration>,
    /// How often the completion watcher polls the remote job listing.
    pub job_check_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CisternConfig {
    /// Requests per backup batch.
    pub batch_size: usize,
    /// Concurrent batch executions.
    pub max_workers: usize,
}

#[derive(Debug, Clone)]
pub struct SiphonConfig {
    /// Sweep existing cache contents through intake at startup.
    pub drain_on_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            cache_timeout: parse_duration(DEFAULT_CACHE_TIMEOUT).expect("default"),
            naptime: NaptimeConfig::default(),
            surveyor: SurveyorConfig::default(),
            cistern: CisternConfig::default(),
            siphon: SiphonConfig::default(),
            storage: S3Config::default(),
        }
    }
}

impl Default for NaptimeConfig {
    fn default() -> Self {
        Self {
            interval: parse_duration(DEFAULT_MONITOR_INTERVAL).expect("default"),
            max_cpu_percent: parse_percent(DEFAULT_MAX_CPU_PERCENT).expect("default"),
            max_memory_percent: parse_percent(DEFAULT_MAX_MEMORY_PERCENT).expect("default"),
            max_disk_usage: parse_size(DEFAULT_MAX_DISK_USAGE).expect("default"),
        }
    }
}

impl Default for SurveyorConfig {
    fn default() -> Self {
        Self {
            max_record_workers: 1,
            max_metadata_workers: 1,
            max_daily_records_requests: DEFAULT_MAX_DAILY_RECORDS_REQUESTS,
            last_modified_window: None,
            job_check_interval: parse_duration(DEFAULT_JOB_CHECK_INTERVAL).expect("default"),
        }
    }
}

impl Default for CisternConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: 1,
        }
    }
}

impl Default for SiphonConfig {
    fn default() -> Self {
        Self { drain_on_start: true }
    }
}

impl Config {
    /// Load configuration from a TOML file, filling gaps with defaults.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("unable to read '{}': {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(raw)
            .map_err(|e| AgentError::Config(format!("invalid configuration: {e}")))?;
        file.resolve()
    }
}

// ---- file format ----

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    base_dir: Option<PathBuf>,
    cache_timeout: Option<String>,
    #[serde(default)]
    naptime: NaptimeSection,
    #[serde(default)]
    surveyor: SurveyorSection,
    #[serde(default)]
    cistern: CisternSection,
    #[serde(default)]
    siphon: SiphonSection,
    #[serde(default)]
    storage: Option<S3Config>,
}

#[derive(Debug, Default, Deserialize)]
struct NaptimeSection {
    interval: Option<String>,
    max_cpu_percent: Option<String>,
    max_memory_percent: Option<String>,
    max_disk_usage: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SurveyorSection {
    max_record_workers: Option<usize>,
    max_metadata_workers: Option<usize>,
    max_daily_records_requests: Option<u64>,
    last_modified_window: Option<String>,
    job_check_interval: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CisternSection {
    batch_size: Option<usize>,
    max_workers: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SiphonSection {
    drain_on_start: Option<bool>,
}

impl FileConfig {
    fn resolve(self) -> Result<Config> {
        let defaults = Config::default();

        let naptime = NaptimeConfig {
            interval: resolve_duration(self.naptime.interval, defaults.naptime.interval)?,
            max_cpu_percent: resolve_percent(
                self.naptime.max_cpu_percent,
                defaults.naptime.max_cpu_percent,
            )?,
            max_memory_percent: resolve_percent(
                self.naptime.max_memory_percent,
                defaults.naptime.max_memory_percent,
            )?,
            max_disk_usage: match self.naptime.max_disk_usage {
                Some(raw) => parse_size(&raw)?,
                None => defaults.naptime.max_disk_usage,
            },
        };

        let surveyor = SurveyorConfig {
            max_record_workers: require_nonzero(
                "surveyor.max_record_workers",
                self.surveyor
                    .max_record_workers
                    .unwrap_or(defaults.surveyor.max_record_workers),
            )?,
            max_metadata_workers: require_nonzero(
                "surveyor.max_metadata_workers",
                self.surveyor
                    .max_metadata_workers
                    .unwrap_or(defaults.surveyor.max_metadata_workers),
            )?,
            max_daily_records_requests: self
                .surveyor
                .max_daily_records_requests
                .unwrap_or(defaults.surveyor.max_daily_records_requests),
            last_modified_window: match self.surveyor.last_modified_window {
                Some(raw) if !raw.is_empty() => Some(parse_duration(&raw)?),
                _ => defaults.surveyor.last_modified_window,
            },
            job_check_interval: resolve_duration(
                self.surveyor.job_check_interval,
                defaults.surveyor.job_check_interval,
            )?,
        };

        let cistern = CisternConfig {
            batch_size: require_nonzero(
                "cistern.batch_size",
                self.cistern.batch_size.unwrap_or(defaults.cistern.batch_size),
            )?,
            max_workers: require_nonzero(
                "cistern.max_workers",
                self.cistern.max_workers.unwrap_or(defaults.cistern.max_workers),
            )?,
        };

        Ok(Config {
            base_dir: self.base_dir.unwrap_or(defaults.base_dir),
            cache_timeout: resolve_duration(self.cache_timeout, defaults.cache_timeout)?,
            naptime,
            surveyor,
            cistern,
            siphon: SiphonConfig {
                drain_on_start: self
                    .siphon
                    .drain_on_start
                    .unwrap_or(defaults.siphon.drain_on_start),
            },
            storage: self.storage.unwrap_or(defaults.storage),
        })
    }
}

// ---- humanized value parsing ----

pub(crate) fn parse_duration(raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| AgentError::Config(format!("invalid duration '{raw}': {e}")))
}

pub(crate) fn parse_percent(raw: &str) -> Result<f32> {
    let trimmed = raw.trim().trim_end_matches('%').trim();
    let value: f32 = trimmed
        .parse()
        .map_err(|_| AgentError::Config(format!("invalid percentage '{raw}'")))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(AgentError::Config(format!(
            "percentage '{raw}' must be within 0-100"
        )));
    }
    Ok(value)
}

pub(crate) fn parse_size(raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|e| AgentError::Config(format!("invalid size '{raw}': {e}")))
}

fn resolve_duration(raw: Option<String>, default: Duration) -> Result<Duration> {
    match raw {
        Some(raw) => parse_duration(&raw),
        None => Ok(default),
    }
}

fn resolve_percent(raw: Option<String>, default: f32) -> Result<f32> {
    match raw {
        Some(raw) => parse_percent(&raw),
        None => Ok(default),
    }
}

fn require_nonzero(key: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(AgentError::Config(format!("{key} must be non-zero")));
    }
    Ok(value)
}
