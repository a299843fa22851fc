//! Worker settings from TOML and environment variables.
//!
//! Every file field is optional; missing ones fall back to the worker
//! defaults. Environment variables override file values.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::core::{BatchWorkerConfig, ItemWorkerConfig, OverflowPolicy};

pub const CONFIG_PATH_ENV: &str = "BLIPBATCH_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSettings {
    pub max_items_per_iteration: usize,
    pub poll_interval_ms: u64,
    /// `None` keeps the queue unbounded.
    pub capacity: Option<usize>,
    pub overflow_policy: OverflowPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    pub max_batch_size: usize,
    pub max_batch_age_ms: u64,
    pub age_check_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub items: ItemSettings,
    pub batch: BatchSettings,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
struct FileItemSettings {
    max_items_per_iteration: Option<usize>,
    poll_interval_ms: Option<u64>,
    capacity: Option<usize>,
    overflow_policy: Option<OverflowPolicy>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
struct FileBatchSettings {
    max_batch_size: Option<usize>,
    max_batch_age_ms: Option<u64>,
    age_check_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    items: FileItemSettings,
    #[serde(default)]
    batch: FileBatchSettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Default for Config {
    fn default() -> Self {
        Self::from_file(FileConfig::default())
    }
}

impl Config {
    fn from_file(file: FileConfig) -> Self {
        let item_defaults = ItemWorkerConfig::default();
        let batch_defaults = BatchWorkerConfig::default();
        Self {
            items: ItemSettings {
                max_items_per_iteration: file
                    .items
                    .max_items_per_iteration
                    .unwrap_or(item_defaults.max_items_per_iteration),
                poll_interval_ms: file
                    .items
                    .poll_interval_ms
                    .unwrap_or(item_defaults.poll_interval.as_millis() as u64),
                capacity: file.items.capacity,
                overflow_policy: file.items.overflow_policy.unwrap_or(item_defaults.overflow),
            },
            batch: BatchSettings {
                max_batch_size: file
                    .batch
                    .max_batch_size
                    .unwrap_or(batch_defaults.max_batch_size),
                max_batch_age_ms: file
                    .batch
                    .max_batch_age_ms
                    .unwrap_or(batch_defaults.max_batch_age.as_millis() as u64),
                age_check_interval_ms: file
                    .batch
                    .age_check_interval_ms
                    .unwrap_or(batch_defaults.age_check_interval.as_millis() as u64),
            },
        }
    }

    /// Parses TOML without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(raw)?;
        let cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from an optional file path and environment variables.
    ///
    /// The path falls back to `BLIPBATCH_CONFIG`; with neither, defaults are
    /// used. Precedence: file values provide defaults, environment variables
    /// override.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let effective_path = path
            .map(str::to_owned)
            .or_else(|| env::var(CONFIG_PATH_ENV).ok());

        let mut cfg = match effective_path {
            Some(p) => Self::from_file(toml::from_str(&fs::read_to_string(p)?)?),
            None => Self::default(),
        };
        cfg.apply_overrides(|key| env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Applies `BLIPBATCH_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
        where
            T::Err: std::fmt::Display,
        {
            raw.trim()
                .parse()
                .map_err(|e| ConfigError::Parse(format!("{key}: {e}")))
        }

        if let Some(v) = lookup("BLIPBATCH_MAX_ITEMS_PER_ITERATION") {
            self.items.max_items_per_iteration = parse("BLIPBATCH_MAX_ITEMS_PER_ITERATION", &v)?;
        }
        if let Some(v) = lookup("BLIPBATCH_POLL_INTERVAL_MS") {
            self.items.poll_interval_ms = parse("BLIPBATCH_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("BLIPBATCH_QUEUE_CAPACITY") {
            // Empty or "unbounded" clears a capacity set by the file.
            self.items.capacity = match v.trim() {
                "" | "unbounded" => None,
                raw => Some(parse("BLIPBATCH_QUEUE_CAPACITY", raw)?),
            };
        }
        if let Some(v) = lookup("BLIPBATCH_OVERFLOW_POLICY") {
            self.items.overflow_policy = parse("BLIPBATCH_OVERFLOW_POLICY", &v)?;
        }
        if let Some(v) = lookup("BLIPBATCH_MAX_BATCH_SIZE") {
            self.batch.max_batch_size = parse("BLIPBATCH_MAX_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("BLIPBATCH_MAX_BATCH_AGE_MS") {
            self.batch.max_batch_age_ms = parse("BLIPBATCH_MAX_BATCH_AGE_MS", &v)?;
        }
        if let Some(v) = lookup("BLIPBATCH_AGE_CHECK_INTERVAL_MS") {
            self.batch.age_check_interval_ms = parse("BLIPBATCH_AGE_CHECK_INTERVAL_MS", &v)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.items.max_items_per_iteration == 0 {
            return Err(ConfigError::Invalid(
                "items.max_items_per_iteration must be at least 1".into(),
            ));
        }
        if self.items.capacity == Some(0) {
            return Err(ConfigError::Invalid("items.capacity must be at least 1".into()));
        }
        if self.batch.max_batch_size == 0 {
            return Err(ConfigError::Invalid("batch.max_batch_size must be at least 1".into()));
        }
        if self.batch.max_batch_age_ms == 0 {
            return Err(ConfigError::Invalid("batch.max_batch_age_ms must be at least 1".into()));
        }
        Ok(())
    }

    pub fn item_worker(&self) -> ItemWorkerConfig {
        ItemWorkerConfig {
            max_items_per_iteration: self.items.max_items_per_iteration,
            poll_interval: Duration::from_millis(self.items.poll_interval_ms),
            capacity: self.items.capacity,
            overflow: self.items.overflow_policy,
        }
    }

    pub fn batch_worker(&self) -> BatchWorkerConfig {
        BatchWorkerConfig {
            items: self.item_worker(),
            max_batch_size: self.batch.max_batch_size,
            max_batch_age: Duration::from_millis(self.batch.max_batch_age_ms),
            age_check_interval: Duration::from_millis(self.batch.age_check_interval_ms),
        }
    }
}

/// Strict loader used by the binary: the file must exist.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, anyhow::Error> {
    let raw: String = fs::read_to_string(path)?;
    let mut config: Config = Config::from_file(toml::from_str(&raw)?);
    config.apply_overrides(|key| env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}
