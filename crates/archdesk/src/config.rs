//! Configuration loading for archdesk.

use anyhow::{Context, Result};
use archdesk_activity::WebhookSubscription;
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    pub storage: Option<StorageConfig>,
    pub activity: Option<ActivityConfig>,
    pub retry: Option<RetryConfig>,
    pub bulk: Option<BulkConfig>,
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct StorageConfig {
    pub uploads_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ActivityConfig {
    pub batch_size: Option<usize>,
    pub flush_delay_ms: Option<u64>,
    pub max_records: Option<usize>,
    pub lock_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct RetryConfig {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct BulkConfig {
    pub batch_size: Option<usize>,
    pub max_concurrency: Option<usize>,
}

/// One `[[webhooks]]` table
#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    pub id: String,
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    pub secret: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub active: Option<bool>,
    pub retry_on_failure: Option<bool>,
    pub max_retries: Option<u32>,
}

impl WebhookConfig {
    pub fn to_subscription(&self) -> WebhookSubscription {
        WebhookSubscription {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            url: self.url.clone(),
            events: self.events.clone(),
            secret: self.secret.clone().filter(|s| !s.is_empty()),
            headers: self.headers.clone(),
            active: self.active.unwrap_or(true),
            retry_on_failure: self.retry_on_failure.unwrap_or(true),
            max_retries: self.max_retries.unwrap_or(3),
        }
    }
}

/// Default activity batch size (50 records)
pub const DEFAULT_ACTIVITY_BATCH_SIZE: usize = 50;

/// Default activity flush delay (2 seconds)
pub const DEFAULT_FLUSH_DELAY_MS: u64 = 2000;

/// Default activity retention (1000 records)
pub const DEFAULT_MAX_RECORDS: usize = 1000;

/// Default activity lock timeout (5 seconds)
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Default bulk operation retries
pub const DEFAULT_BULK_MAX_RETRIES: u32 = 3;

/// Default bulk retry base delay (100ms)
pub const DEFAULT_BULK_BASE_DELAY_MS: u64 = 100;

/// Default bulk retry delay cap (2 seconds)
pub const DEFAULT_BULK_MAX_DELAY_MS: u64 = 2000;

/// Default bulk batch size
pub const DEFAULT_BULK_BATCH_SIZE: usize = 5;

/// Default bulk concurrency per batch
pub const DEFAULT_BULK_MAX_CONCURRENCY: usize = 3;

impl Config {
    /// Data directory; falls back to the platform data dir, then `./data`.
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|storage| storage.data_dir.clone())
            .or_else(|| ProjectDirs::from("", "", "archdesk").map(|dirs| dirs.data_dir().to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("data"))
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|storage| storage.uploads_dir.clone())
            .unwrap_or_else(|| self.data_dir().join("uploads"))
    }

    pub fn activity_log_path(&self) -> PathBuf {
        self.data_dir().join("activity-log.jsonl")
    }

    pub fn activity_batch_size(&self) -> usize {
        self.activity
            .as_ref()
            .and_then(|a| a.batch_size)
            .unwrap_or(DEFAULT_ACTIVITY_BATCH_SIZE)
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(
            self.activity
                .as_ref()
                .and_then(|a| a.flush_delay_ms)
                .unwrap_or(DEFAULT_FLUSH_DELAY_MS),
        )
    }

    pub fn max_records(&self) -> usize {
        self.activity
            .as_ref()
            .and_then(|a| a.max_records)
            .unwrap_or(DEFAULT_MAX_RECORDS)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(
            self.activity
                .as_ref()
                .and_then(|a| a.lock_timeout_ms)
                .unwrap_or(DEFAULT_LOCK_TIMEOUT_MS),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.retry
            .as_ref()
            .and_then(|r| r.max_retries)
            .unwrap_or(DEFAULT_BULK_MAX_RETRIES)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(
            self.retry
                .as_ref()
                .and_then(|r| r.base_delay_ms)
                .unwrap_or(DEFAULT_BULK_BASE_DELAY_MS),
        )
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(
            self.retry
                .as_ref()
                .and_then(|r| r.max_delay_ms)
                .unwrap_or(DEFAULT_BULK_MAX_DELAY_MS),
        )
    }

    pub fn bulk_batch_size(&self) -> usize {
        self.bulk
            .as_ref()
            .and_then(|b| b.batch_size)
            .unwrap_or(DEFAULT_BULK_BATCH_SIZE)
    }

    pub fn bulk_max_concurrency(&self) -> usize {
        self.bulk
            .as_ref()
            .and_then(|b| b.max_concurrency)
            .unwrap_or(DEFAULT_BULK_MAX_CONCURRENCY)
    }

    pub fn webhook_subscriptions(&self) -> Vec<WebhookSubscription> {
        self.webhooks.iter().map(WebhookConfig::to_subscription).collect()
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "archdesk").context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&contents).context("Failed to parse config file as TOML")?;
    Ok(config)
}
