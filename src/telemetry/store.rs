//! Per-proxy counters with a serializable snapshot.
//!
//! Complements the `metrics` facade: the facade feeds whatever exporter the
//! host installs, this store answers "what did this proxy do" for tests and
//! the CLI.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub direct_calls: u64,
    pub priority_immediate: u64,
    pub low_priority_queued: u64,
    pub low_priority_flushed: u64,
    pub transactions_begun: u64,
    pub transactions_committed: u64,
    pub transaction_requests: u64,
    pub dynamic_windows: u64,
    pub pass_through_calls: u64,
    pub bundle_calls: u64,
    pub bundle_members: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub item_failures: u64,
    pub transport_failures: u64,
    pub unresolved: u64,
}

#[derive(Default)]
pub struct StatsStore {
    direct_calls: AtomicU64,
    priority_immediate: AtomicU64,
    low_priority_queued: AtomicU64,
    low_priority_flushed: AtomicU64,
    transactions_begun: AtomicU64,
    transactions_committed: AtomicU64,
    transaction_requests: AtomicU64,
    dynamic_windows: AtomicU64,
    pass_through_calls: AtomicU64,
    bundle_calls: AtomicU64,
    bundle_members: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    item_failures: AtomicU64,
    transport_failures: AtomicU64,
    unresolved: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direct_call(&self) {
        bump(&self.direct_calls, 1);
    }

    pub fn priority_immediate(&self) {
        bump(&self.priority_immediate, 1);
    }

    pub fn low_priority_queued(&self) {
        bump(&self.low_priority_queued, 1);
    }

    pub fn low_priority_flushed(&self, count: usize) {
        bump(&self.low_priority_flushed, count as u64);
    }

    pub fn transaction_begun(&self) {
        bump(&self.transactions_begun, 1);
    }

    pub fn transaction_committed(&self) {
        bump(&self.transactions_committed, 1);
    }

    pub fn transaction_request(&self) {
        bump(&self.transaction_requests, 1);
    }

    pub fn dynamic_window(&self) {
        bump(&self.dynamic_windows, 1);
    }

    pub fn pass_through_call(&self) {
        bump(&self.pass_through_calls, 1);
    }

    pub fn bundle_call(&self, members: usize) {
        bump(&self.bundle_calls, 1);
        bump(&self.bundle_members, members as u64);
    }

    pub fn cache_lookup(&self, hit: bool) {
        if hit {
            bump(&self.cache_hits, 1);
        } else {
            bump(&self.cache_misses, 1);
        }
    }

    pub fn item_failure(&self) {
        bump(&self.item_failures, 1);
    }

    pub fn transport_failure(&self) {
        bump(&self.transport_failures, 1);
    }

    pub fn unresolved(&self, count: usize) {
        bump(&self.unresolved, count as u64);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            direct_calls: load(&self.direct_calls),
            priority_immediate: load(&self.priority_immediate),
            low_priority_queued: load(&self.low_priority_queued),
            low_priority_flushed: load(&self.low_priority_flushed),
            transactions_begun: load(&self.transactions_begun),
            transactions_committed: load(&self.transactions_committed),
            transaction_requests: load(&self.transaction_requests),
            dynamic_windows: load(&self.dynamic_windows),
            pass_through_calls: load(&self.pass_through_calls),
            bundle_calls: load(&self.bundle_calls),
            bundle_members: load(&self.bundle_members),
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            item_failures: load(&self.item_failures),
            transport_failures: load(&self.transport_failures),
            unresolved: load(&self.unresolved),
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.direct_calls,
            &self.priority_immediate,
            &self.low_priority_queued,
            &self.low_priority_flushed,
            &self.transactions_begun,
            &self.transactions_committed,
            &self.transaction_requests,
            &self.dynamic_windows,
            &self.pass_through_calls,
            &self.bundle_calls,
            &self.bundle_members,
            &self.cache_hits,
            &self.cache_misses,
            &self.item_failures,
            &self.transport_failures,
            &self.unresolved,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
