//! Castbot configuration system.
//!
//! `~/.castbot/config.toml`, then environment overrides on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CastError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Where settings.json, runtime.json and history.json live.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// One sub-folder per campaign.
    #[serde(default = "default_content_dir")]
    pub content_dir: String,
    /// Chat that receives run reports and notices. 0 = none.
    #[serde(default)]
    pub control_destination: i64,
    /// Timezone used until one is persisted in settings.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

fn default_data_dir() -> String { "~/.castbot/data".into() }
fn default_content_dir() -> String { "~/.castbot/content_databases".into() }
fn default_timezone() -> String { "Asia/Taipei".into() }
fn default_history_limit() -> usize { 100 }

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            content_dir: default_content_dir(),
            control_destination: 0,
            default_timezone: default_timezone(),
            history_limit: default_history_limit(),
            delivery: DeliveryConfig::default(),
            scheduler: SchedulerConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load config from the default path, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load config from a specific path (no environment overrides).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CastError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CastError::Config(format!("Failed to parse config: {e}")))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Overlay environment variables. `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("CASTBOT_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(dir) = lookup("CASTBOT_DATA_DIR") {
            self.data_dir = dir;
        }
        if let Some(dir) = lookup("CASTBOT_CONTENT_DIR") {
            self.content_dir = dir;
        }
        if let Some(tz) = lookup("TIMEZONE") {
            self.default_timezone = tz;
        }
        if let Some(v) = lookup("CONTROL_GROUP") {
            self.control_destination = parse_env("CONTROL_GROUP", &v)?;
        }
        if let Some(v) = lookup("BROADCAST_DELAY") {
            self.delivery.broadcast_delay_secs = parse_env("BROADCAST_DELAY", &v)?;
        }
        if let Some(v) = lookup("MAX_RETRIES") {
            self.delivery.max_retries = parse_env("MAX_RETRIES", &v)?;
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CastError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Write a default config to `path` unless a file is already there.
    /// Returns whether one was written.
    pub fn write_default(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        Self::default().save_to(path)?;
        Ok(true)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Castbot home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".castbot")
    }

    pub fn data_path(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }

    pub fn content_path(&self) -> PathBuf {
        expand_path(&self.content_dir)
    }

    pub fn control_destination(&self) -> Option<i64> {
        (self.control_destination != 0).then_some(self.control_destination)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CastError::Config(format!("{key}: invalid value '{value}'")))
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Fan-out pacing and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause between two destinations.
    #[serde(default = "default_broadcast_delay")]
    pub broadcast_delay_secs: u64,
    /// Pause between two attempts on the same destination.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_max_retries() -> u32 { 3 }
fn default_broadcast_delay() -> u64 { 2 }
fn default_retry_backoff() -> u64 { 2 }
fn default_send_timeout() -> u64 { 30 }

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            broadcast_delay_secs: default_broadcast_delay(),
            retry_backoff_secs: default_retry_backoff(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

impl DeliveryConfig {
    pub fn inter_send_delay(&self) -> Duration {
        Duration::from_secs(self.broadcast_delay_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// Trigger loop cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval() -> u64 { 1000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Telegram Bot API access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String { "https://api.telegram.org".into() }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_api_base(),
        }
    }
}
