//! Runtime configuration for the sync stack.
//!
//! `AppConfig` is read from an optional JSON file and then adjusted by
//! environment overrides. Every section has defaults, so an empty object (or
//! no file at all) yields a working local-only configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{has_http_scheme, non_blank};

/// Default number of attempts before a queued operation is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default storage key holding the persisted queue.
pub const DEFAULT_STORAGE_KEY: &str = "sync_queue";

const DEFAULT_PROBE_INTERVAL_SECS: u64 = 15;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 4;

/// Env var overriding the database path.
pub const ENV_DB_PATH: &str = "BLOOM_DB_PATH";
/// Env var overriding the retry cap.
pub const ENV_MAX_RETRIES: &str = "BLOOM_MAX_RETRIES";

/// Sync queue behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncQueueConfig {
    /// Attempts per operation before it is dropped
    pub max_retries: u32,
    /// Key under which the queue is persisted
    pub storage_key: String,
}

impl Default for SyncQueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

/// HTTP connectivity probe settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// URL that answers `HEAD` when the backend is reachable
    pub url: String,
    #[serde(default = "default_probe_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProbeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
        }
    }

    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

const fn default_probe_interval_secs() -> u64 {
    DEFAULT_PROBE_INTERVAL_SECS
}

const fn default_probe_timeout_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Local database file; `None` means the caller's default location
    pub database_path: Option<PathBuf>,
    pub sync_queue: SyncQueueConfig,
    pub connectivity_probe: Option<ProbeConfig>,
}

impl AppConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid config JSON: {error}")))?;
        config.validate()
    }

    /// Load configuration from `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let payload = std::fs::read_to_string(path)?;
        Self::from_json(&payload)
    }

    /// Apply `BLOOM_*` environment overrides on top of the parsed values.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = non_blank(lookup(ENV_DB_PATH).as_deref()) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = non_blank(lookup(ENV_MAX_RETRIES).as_deref()) {
            self.sync_queue.max_retries = raw.parse().map_err(|_| {
                Error::Config(format!("{ENV_MAX_RETRIES} must be a whole number, got '{raw}'"))
            })?;
        }
        self.validate()
    }

    fn validate(mut self) -> Result<Self> {
        self.sync_queue.storage_key = non_blank(Some(&self.sync_queue.storage_key))
            .ok_or_else(|| Error::Config("sync_queue.storage_key must not be empty".to_string()))?;

        if let Some(probe) = self.connectivity_probe.as_mut() {
            let url = non_blank(Some(&probe.url)).ok_or_else(|| {
                Error::Config("connectivity_probe.url must not be empty".to_string())
            })?;
            if !has_http_scheme(&url) {
                return Err(Error::Config(
                    "connectivity_probe.url must include http:// or https://".to_string(),
                ));
            }
            if probe.interval_secs == 0 || probe.timeout_secs == 0 {
                return Err(Error::Config(
                    "connectivity_probe interval and timeout must be at least one second"
                        .to_string(),
                ));
            }
            probe.url = url;
        }

        Ok(self)
    }
}
