//! Exchange configuration: `{data_dir}/config.json`.
//!
//! Sections:
//!   - `database_path`: optional override of `{data_dir}/exchange.db`
//!   - `notifier`: outbound email (HTTP API endpoint, key env var, sender)
//!   - `relay`: per-session queue capacity
//!   - `log_level`: default tracing filter when RUST_LOG is unset

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_API_KEY_ENV, DEFAULT_FROM_ADDRESS, DEFAULT_NOTIFY_TIMEOUT_SECS, DEFAULT_RELAY_QUEUE_CAPACITY,
    MAX_RELAY_QUEUE_CAPACITY,
};
use crate::storage::path_utils;
use crate::{ExchangeError, ExchangeResult};

// ============================================================================
// NOTIFIER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotifierConfig {
    /// HTTP endpoint accepting `{from, to, subject, html}` JSON. None = log only.
    pub endpoint: Option<String>,
    /// Environment variable holding the bearer API key.
    pub api_key_env: String,
    pub from_address: String,
    pub timeout_secs: u64,
    pub enabled: bool,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            from_address: DEFAULT_FROM_ADDRESS.to_string(),
            timeout_secs: DEFAULT_NOTIFY_TIMEOUT_SECS,
            enabled: true,
        }
    }
}

// ============================================================================
// RELAY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Max buffered events per session. If full, new events are dropped.
    pub queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_RELAY_QUEUE_CAPACITY,
        }
    }
}

// ============================================================================
// ROOT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExchangeConfig {
    pub database_path: Option<PathBuf>,
    pub notifier: NotifierConfig,
    pub relay: RelayConfig,
    pub log_level: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            notifier: NotifierConfig::default(),
            relay: RelayConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl ExchangeConfig {
    /// Load from `{data_dir}/config.json`.
    /// Returns defaults if the file is missing or invalid.
    pub fn load() -> Self {
        Self::load_from(&path_utils::config_path())
    }

    pub fn load_from(config_path: &std::path::Path) -> Self {
        let mut config = match std::fs::read_to_string(config_path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %config_path.display(),
                    error = %e,
                    "Invalid exchange config, using defaults"
                );
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        config.validate();
        config
    }

    /// Save to `{data_dir}/config.json`.
    pub fn save(&self) -> ExchangeResult<()> {
        self.save_to(&path_utils::config_path())
    }

    pub fn save_to(&self, config_path: &std::path::Path) -> ExchangeResult<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, json)?;
        Ok(())
    }

    /// Clamps out-of-range values back to something usable.
    pub fn validate(&mut self) {
        if self.relay.queue_capacity == 0 || self.relay.queue_capacity > MAX_RELAY_QUEUE_CAPACITY {
            tracing::warn!(
                value = self.relay.queue_capacity,
                "relay.queue_capacity out of range, clamping"
            );
            self.relay.queue_capacity = self.relay.queue_capacity.clamp(1, MAX_RELAY_QUEUE_CAPACITY);
        }
        if self.notifier.timeout_secs == 0 {
            tracing::warn!(field = "notifier.timeout_secs", "Must be > 0, resetting to default");
            self.notifier.timeout_secs = DEFAULT_NOTIFY_TIMEOUT_SECS;
        }
        if self.notifier.from_address.trim().is_empty() {
            self.notifier.from_address = DEFAULT_FROM_ADDRESS.to_string();
        }
        if self.notifier.endpoint.as_deref().is_some_and(|e| e.trim().is_empty()) {
            self.notifier.endpoint = None;
        }
        let level = self.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            tracing::warn!(value = %self.log_level, "Unknown log_level, resetting to info");
            self.log_level = "info".to_string();
        } else {
            self.log_level = level;
        }
    }

    /// Value at a dot-notation key, e.g. `notifier.endpoint`.
    pub fn get_key(&self, key: &str) -> ExchangeResult<serde_json::Value> {
        let root = serde_json::to_value(self)?;
        let mut cur = &root;
        for part in key.split('.') {
            cur = cur
                .get(part)
                .ok_or_else(|| ExchangeError::Validation(format!("unknown config key: {}", key)))?;
        }
        Ok(cur.clone())
    }

    /// Sets a dot-notation key. `raw` is parsed as JSON when possible, so
    /// `64`, `true` and `null` keep their types; anything else is a string.
    pub fn set_key(&mut self, key: &str, raw: &str) -> ExchangeResult<()> {
        let mut root = serde_json::to_value(&*self)?;
        let value: serde_json::Value =
            serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));

        let parts: Vec<&str> = key.split('.').collect();
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| ExchangeError::Validation("empty config key".into()))?;
        let mut cur = &mut root;
        for part in parents {
            cur = cur
                .get_mut(*part)
                .ok_or_else(|| ExchangeError::Validation(format!("unknown config key: {}", key)))?;
        }
        let obj = cur
            .as_object_mut()
            .ok_or_else(|| ExchangeError::Validation(format!("not a section: {}", key)))?;
        if !obj.contains_key(*last) {
            return Err(ExchangeError::Validation(format!("unknown config key: {}", key)));
        }
        obj.insert(last.to_string(), value);

        let mut updated: ExchangeConfig = serde_json::from_value(root)
            .map_err(|e| ExchangeError::Validation(format!("invalid value for {}: {}", key, e)))?;
        updated.validate();
        *self = updated;
        Ok(())
    }
}
