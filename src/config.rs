//! Configuration file parser for ~/.config/feedgather/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::storage::StoreBackend;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration. Every section and key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub fetch: FetchConfig,
    pub breaker: BreakerConfig,
}

/// Subscription store selection and durable backend connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database path for the durable backend (`:memory:` allowed).
    pub database: String,
    /// Table holding one row per (user, url).
    pub table: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Volatile,
            database: "subscriptions.db".to_string(),
            table: "subscriptions".to_string(),
            max_connections: 3,
        }
    }
}

/// Feed fetch isolation: worker pool, queue and per-request limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Resource group name; breaker state and the worker pool are keyed by it.
    pub group: String,
    pub timeout_ms: u64,
    /// Maximum simultaneous outbound fetches.
    pub worker_pool_size: usize,
    /// Fetches allowed to wait for a worker before being rejected to fallback.
    pub queue_depth: usize,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            group: "feed-get".to_string(),
            timeout_ms: 3_000,
            worker_pool_size: 10,
            queue_depth: 20,
            max_body_bytes: 10 * 1024 * 1024,
            user_agent: concat!("feedgather/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Circuit breaker thresholds for the fetch resource group.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failure percentage (0-100) at or above which the breaker opens.
    pub error_threshold_percent: u8,
    /// Minimum calls inside the rolling window before the percentage counts.
    pub request_volume_threshold: u64,
    pub rolling_window_ms: u64,
    /// Number of buckets the rolling window is divided into.
    pub window_buckets: usize,
    /// How long the breaker stays open before letting one trial call through.
    pub sleep_window_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_percent: 50,
            request_volume_threshold: 20,
            rolling_window_ms: 10_000,
            window_buckets: 10,
            sleep_window_ms: 5_000,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text, applying defaults for anything
    /// not present.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            backend = %config.store.backend,
            group = %config.fetch.group,
            "Loaded configuration"
        );
        Ok(config)
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    const SECTIONS: [(&str, &[&str]); 3] = [
        ("store", &["backend", "database", "table", "max_connections"]),
        (
            "fetch",
            &[
                "group",
                "timeout_ms",
                "worker_pool_size",
                "queue_depth",
                "max_body_bytes",
                "user_agent",
            ],
        ),
        (
            "breaker",
            &[
                "error_threshold_percent",
                "request_volume_threshold",
                "rolling_window_ms",
                "window_buckets",
                "sleep_window_ms",
            ],
        ),
    ];

    for (key, value) in raw {
        let Some((_, known)) = SECTIONS.iter().find(|(name, _)| *name == key.as_str()) else {
            tracing::warn!(key = %key, "Unknown section in config file, ignoring");
            continue;
        };
        if let Some(table) = value.as_table() {
            for sub in table.keys() {
                if !known.contains(&sub.as_str()) {
                    tracing::warn!(section = %key, key = %sub, "Unknown key in config file, ignoring");
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
