//! Run configuration.
//!
//! Three files drive a run:
//!
//! - the TOML run config (`config/mingest.toml`): provider files, resolver
//!   rules, staging, object store and warehouse targets;
//! - the JSON settings file named by `provider.settings_path`: `api_url` and
//!   the `payload_template` every request is built from;
//! - the JSON category tree named by `provider.categories_path`.
//!
//! Relative paths inside the TOML file are resolved against the directory the
//! file lives in. Every failure here is an [`Error::Configuration`]; nothing
//! starts until all three files load and validate.

use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::CategoryTree;
use crate::payload::template_region;
use crate::resolver::ResolverConfig;
use crate::transcode::DEFAULT_CHUNK_ROWS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    pub object_store: ObjectStoreConfig,
    pub warehouse: WarehouseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub settings_path: PathBuf,
    pub categories_path: PathBuf,
    /// Whole-request timeout; unset means no limit on long downloads.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StagingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_local_timezone")]
    pub local_timezone: String,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: i64,
    /// Directory for staged artifacts; the system temp dir when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_ROWS
}

fn default_local_timezone() -> String {
    "Europe/Berlin".to_string()
}

fn default_interval_minutes() -> i64 {
    15
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            local_timezone: default_local_timezone(),
            interval_minutes: default_interval_minutes(),
            dir: None,
        }
    }
}

impl StagingConfig {
    pub fn timezone(&self) -> Result<Tz> {
        self.local_timezone.parse::<Tz>().map_err(|e| {
            Error::config(format!(
                "staging.local_timezone '{}' is not a known zone: {}",
                self.local_timezone, e
            ))
        })
    }

    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.interval_minutes)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub project: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseConfig {
    pub project: String,
    pub dataset: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_location() -> String {
    "europe-west3".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl WarehouseConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Provider settings file.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub api_url: String,
    pub payload_template: Map<String, Value>,
}

impl Settings {
    pub fn region(&self) -> Result<&str> {
        template_region(&self.payload_template)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!("failed to read config file {}: {}", path.display(), e))
    })?;

    let mut config: Config = toml::from_str(&content).map_err(|e| {
        Error::config(format!("failed to parse config file {}: {}", path.display(), e))
    })?;

    if let Some(base) = path.parent() {
        config.provider.settings_path = rebase(base, &config.provider.settings_path);
        config.provider.categories_path = rebase(base, &config.provider.categories_path);
        config.staging.dir = config.staging.dir.as_deref().map(|d| rebase(base, d));
    }

    // Validate staging
    if config.staging.chunk_size == 0 {
        return Err(Error::config("staging.chunk_size must be > 0"));
    }
    if config.staging.interval_minutes <= 0 {
        return Err(Error::config("staging.interval_minutes must be > 0"));
    }
    config.staging.timezone()?;

    // Validate targets
    for (key, value) in [
        ("object_store.bucket", &config.object_store.bucket),
        ("object_store.project", &config.object_store.project),
        ("warehouse.project", &config.warehouse.project),
        ("warehouse.dataset", &config.warehouse.dataset),
    ] {
        if value.trim().is_empty() {
            return Err(Error::config(format!("{} must not be empty", key)));
        }
    }
    if config.warehouse.poll_interval_ms == 0 {
        return Err(Error::config("warehouse.poll_interval_ms must be > 0"));
    }

    Ok(config)
}

fn rebase(base: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path.to_path_buf()
    }
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    let settings: Settings = read_json(path, "settings")?;
    if settings.api_url.trim().is_empty() {
        return Err(Error::config(format!("{}: api_url is empty", path.display())));
    }
    settings
        .region()
        .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
    Ok(settings)
}

/// Load the category tree. Every module must name at least one region.
pub fn load_categories(path: &Path) -> Result<CategoryTree> {
    let tree: CategoryTree = read_json(path, "category")?;
    for main in &tree.main {
        for sub in &main.sub {
            for module in sub.module.default.iter().chain(&sub.module.other) {
                if module.region.iter().all(|r| r.trim().is_empty()) {
                    return Err(Error::config(format!(
                        "{}: module {} under {}/{} has no region",
                        path.display(),
                        module.id,
                        main.name,
                        sub.name
                    )));
                }
            }
        }
    }
    Ok(tree)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!("failed to read {} file {}: {}", what, path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::config(format!("failed to parse {} file {}: {}", what, path.display(), e))
    })
}
