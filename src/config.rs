//! Proxy configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file named by
//! `RELAY_CONFIG`, then `RELAY_*` environment variables. Invalid environment
//! values fall back to the lower layer without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `RELAY_CONFIG` | unset | Path of a TOML config file |
//! | `RELAY_BUNDLING_ENABLED` | true | Group transaction requests into bundles |
//! | `RELAY_PRIORITY_ENABLED` | true | Defer low-priority requests |
//! | `RELAY_DYNAMIC_BUNDLING` | false | Open implicit short-lived transactions |
//! | `RELAY_LOW_PRIORITY_FLUSH_MS` | 3001 | Quiet window before low-priority flush |
//! | `RELAY_DYNAMIC_WINDOW_MS` | 101 | Lifetime of an implicit transaction |
//! | `RELAY_CACHE_ENABLED` | false | Serve repeated URLs from the response cache |
//! | `RELAY_CACHE_TTL_MS` | 2001 | Response cache time-to-live |
//! | `RELAY_BUNDLE_ENDPOINT` | /api/multi-request | URL the bundle call is posted to |

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LOW_PRIORITY_FLUSH_MS: u64 = 3001;
pub const DEFAULT_DYNAMIC_WINDOW_MS: u64 = 101;
pub const DEFAULT_CACHE_TTL_MS: u64 = 2001;
pub const DEFAULT_BUNDLE_ENDPOINT: &str = "/api/multi-request";

/// Recognized feature switches and timing constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub bundling_enabled: bool,
    pub priority_enabled: bool,
    pub dynamic_bundling_enabled: bool,
    pub low_priority_flush_delay_ms: u64,
    pub dynamic_window_ms: u64,
    pub cache_enabled: bool,
    pub cache_ttl_ms: u64,
    pub bundle_endpoint: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bundling_enabled: true,
            priority_enabled: true,
            dynamic_bundling_enabled: false,
            low_priority_flush_delay_ms: DEFAULT_LOW_PRIORITY_FLUSH_MS,
            dynamic_window_ms: DEFAULT_DYNAMIC_WINDOW_MS,
            cache_enabled: false,
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            bundle_endpoint: DEFAULT_BUNDLE_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ProxyConfig {
    /// The same fixed delay governs the low-priority flush and the deferred
    /// commit of low-priority-only transactions.
    pub fn low_priority_flush_delay(&self) -> Duration {
        Duration::from_millis(self.low_priority_flush_delay_ms)
    }

    pub fn dynamic_window(&self) -> Duration {
        Duration::from_millis(self.dynamic_window_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        Ok(config.normalized())
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Apply `RELAY_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        self.bundling_enabled = parse_bool("RELAY_BUNDLING_ENABLED", self.bundling_enabled);
        self.priority_enabled = parse_bool("RELAY_PRIORITY_ENABLED", self.priority_enabled);
        self.dynamic_bundling_enabled =
            parse_bool("RELAY_DYNAMIC_BUNDLING", self.dynamic_bundling_enabled);
        self.low_priority_flush_delay_ms =
            parse_u64("RELAY_LOW_PRIORITY_FLUSH_MS", self.low_priority_flush_delay_ms);
        self.dynamic_window_ms = parse_u64("RELAY_DYNAMIC_WINDOW_MS", self.dynamic_window_ms);
        self.cache_enabled = parse_bool("RELAY_CACHE_ENABLED", self.cache_enabled);
        self.cache_ttl_ms = parse_u64("RELAY_CACHE_TTL_MS", self.cache_ttl_ms);
        if let Ok(endpoint) = std::env::var("RELAY_BUNDLE_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.bundle_endpoint = endpoint;
            }
        }
        self.normalized()
    }

    /// Floor the timer windows at 1 ms.
    fn normalized(mut self) -> Self {
        self.low_priority_flush_delay_ms = self.low_priority_flush_delay_ms.max(1);
        self.dynamic_window_ms = self.dynamic_window_ms.max(1);
        self
    }

    /// Combinations that are accepted but probably not what was meant.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.dynamic_bundling_enabled && !self.bundling_enabled {
            warnings.push(
                "RELAY_DYNAMIC_BUNDLING has no effect while RELAY_BUNDLING_ENABLED is false"
                    .to_string(),
            );
        }
        if self.cache_enabled && self.cache_ttl_ms == 0 {
            warnings.push("RELAY_CACHE_TTL_MS is 0; every cached entry expires immediately".to_string());
        }
        if self.bundling_enabled && self.bundle_endpoint.trim().is_empty() {
            warnings.push("RELAY_BUNDLE_ENDPOINT is empty".to_string());
        }
        warnings
    }

    /// Key/value summary of the effective values.
    pub fn effective(&self) -> Vec<(&'static str, String)> {
        vec![
            ("RELAY_BUNDLING_ENABLED", self.bundling_enabled.to_string()),
            ("RELAY_PRIORITY_ENABLED", self.priority_enabled.to_string()),
            ("RELAY_DYNAMIC_BUNDLING", self.dynamic_bundling_enabled.to_string()),
            ("RELAY_LOW_PRIORITY_FLUSH_MS", self.low_priority_flush_delay_ms.to_string()),
            ("RELAY_DYNAMIC_WINDOW_MS", self.dynamic_window_ms.to_string()),
            ("RELAY_CACHE_ENABLED", self.cache_enabled.to_string()),
            ("RELAY_CACHE_TTL_MS", self.cache_ttl_ms.to_string()),
            ("RELAY_BUNDLE_ENDPOINT", self.bundle_endpoint.clone()),
        ]
    }
}

fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

// Serializes env-mutating tests across the crate.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Load configuration from defaults, `RELAY_CONFIG` and the environment.
pub fn load() -> Result<ProxyConfig, ConfigError> {
    let base = match std::env::var("RELAY_CONFIG") {
        Ok(path) if !path.trim().is_empty() => ProxyConfig::from_toml_file(Path::new(&path))?,
        _ => ProxyConfig::default(),
    };
    Ok(base.with_env_overrides())
}
