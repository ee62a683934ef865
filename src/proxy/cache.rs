//! Time-boxed response cache keyed by request URL.
//!
//! Uses DashMap for lock-free concurrent access. Entries are never swept;
//! an expired entry is evicted by the lookup that finds it.
//!
//! The key is the URL alone: method and body are not part of it, so a hit is
//! only meaningful for idempotent GET-like endpoints.

use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::ProxyConfig;

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    stored_at: Instant,
}

/// Response cache shared by every commit of one proxy.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    enabled: bool,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(enabled: bool, ttl: Duration) -> Self {
        Self { entries: DashMap::new(), enabled, ttl }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.cache_enabled, config.cache_ttl())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached payload for `url`, if enabled, present, non-empty and within TTL.
    ///
    /// An entry older than the TTL is removed, so it stays absent afterwards.
    pub fn lookup(&self, url: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let ttl = self.ttl;
        if self
            .entries
            .remove_if(url, |_, entry| entry.stored_at.elapsed() > ttl)
            .is_some()
        {
            tracing::trace!(url, "cache entry expired");
            return None;
        }
        let entry = self.entries.get(url)?;
        if is_empty_payload(&entry.payload) {
            return None;
        }
        Some(entry.payload.clone())
    }

    /// Store `payload` under `url`, replacing any previous entry.
    pub fn store(&self, url: &str, payload: Value) {
        if !self.enabled {
            return;
        }
        self.entries.insert(url.to_string(), CacheEntry { payload, stored_at: Instant::now() });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Empty payloads are stored but never served. Scalars other than a
/// non-empty string count as empty.
fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null | Value::Bool(_) | Value::Number(_) => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
