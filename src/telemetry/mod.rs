//! Telemetry for the request coordination proxy.
//!
//! Provides structured logging, per-call spans, `metrics` facade counters
//! and a per-proxy stats store that can be snapshotted.

mod logging;
mod metrics;
mod spans;
mod store;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    record_bundle_call, record_bundle_item, record_cache_lookup, record_dispatch,
    record_low_priority_flush, BundleKind, DispatchPath, ItemOutcome,
};
pub use spans::{RequestSpan, SpanExt};
pub use store::{StatsSnapshot, StatsStore};
