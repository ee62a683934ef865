//! `metrics` facade recording helpers.
//!
//! These only emit to whatever recorder the host process installed; with no
//! recorder they are no-ops.

use ::metrics::{counter, histogram};

/// Route taken by `Proxy::dispatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPath {
    Transaction,
    PriorityImmediate,
    PriorityQueued,
    Direct,
}

impl DispatchPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::PriorityImmediate => "priority_immediate",
            Self::PriorityQueued => "priority_queued",
            Self::Direct => "direct",
        }
    }
}

/// Shape of the wire call issued for a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    PassThrough,
    Bundle,
}

/// How one bundle member resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Success,
    Failed,
    Missing,
}

pub fn record_dispatch(path: DispatchPath) {
    counter!("relay_dispatch_total", "path" => path.as_str()).increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("relay_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_bundle_call(kind: BundleKind, size: usize) {
    let kind = match kind {
        BundleKind::PassThrough => "pass_through",
        BundleKind::Bundle => "bundle",
    };
    counter!("relay_bundle_calls_total", "kind" => kind).increment(1);
    histogram!("relay_bundle_size").record(size as f64);
}

pub fn record_bundle_item(outcome: ItemOutcome) {
    let outcome = match outcome {
        ItemOutcome::Success => "success",
        ItemOutcome::Failed => "failed",
        ItemOutcome::Missing => "missing",
    };
    counter!("relay_bundle_items_total", "outcome" => outcome).increment(1);
}

pub fn record_low_priority_flush(count: usize) {
    counter!("relay_low_priority_flushed_total").increment(count as u64);
}
