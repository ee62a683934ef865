//! Request coordination: transactions, bundling, priority scheduling and the
//! response cache, tied together by [`Proxy`].

mod bundle;
mod cache;
mod dispatcher;
mod priority;
mod registry;
mod timer;
pub mod wire;

pub use bundle::BundleExecutor;
pub use cache::ResponseCache;
pub use dispatcher::ProxyDispatcher;
pub use priority::PriorityScheduler;
pub use registry::TransactionRegistry;

use std::sync::Arc;

use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::request::{Reply, Request, RequestHandle, Response, ResponseSource, TransactionId};
use crate::telemetry::{self, DispatchPath, StatsSnapshot, StatsStore};
use crate::transport::{issue, Transport, WireRequest};

/// Issue `request` as an ordinary call and resolve `reply` with its outcome.
pub(crate) fn send_direct(
    transport: &Arc<dyn Transport>,
    stats: &Arc<StatsStore>,
    request: Request,
    reply: Reply,
) -> AbortHandle {
    let wire = WireRequest::new(request.method, request.url, request.data);
    let stats = Arc::clone(stats);
    issue(transport, wire, move |outcome| match outcome {
        Ok(response) => reply.resolve(Ok(Response::from_transport(response, ResponseSource::Network))),
        Err(err) => {
            tracing::debug!(status = err.status, error = %err, "call failed");
            stats.transport_failure();
            reply.resolve(Err(err.into()));
        }
    })
}

/// Request coordination context.
///
/// Owns every table the proxy keeps; two proxies never share state. Must be
/// used from inside a tokio runtime, since timers and in-flight calls run as
/// tasks.
pub struct Proxy {
    config: ProxyConfig,
    cache: Arc<ResponseCache>,
    registry: Arc<TransactionRegistry>,
    scheduler: Arc<PriorityScheduler>,
    dispatcher: Arc<ProxyDispatcher>,
    stats: Arc<StatsStore>,
    shutdown: CancellationToken,
}

impl Proxy {
    pub fn new(config: ProxyConfig, transport: Arc<dyn Transport>) -> Self {
        let stats = Arc::new(StatsStore::new());
        let shutdown = CancellationToken::new();
        let cache = Arc::new(ResponseCache::from_config(&config));

        let executor = Arc::new(BundleExecutor::new(
            Arc::clone(&transport),
            Arc::clone(&cache),
            Arc::clone(&stats),
            config.bundle_endpoint.clone(),
        ));
        let low_priority_delay = config.priority_enabled.then(|| config.low_priority_flush_delay());
        let registry = Arc::new(TransactionRegistry::new(
            executor,
            low_priority_delay,
            Arc::clone(&stats),
            shutdown.clone(),
        ));
        let scheduler = Arc::new(PriorityScheduler::new(
            Arc::clone(&transport),
            config.low_priority_flush_delay(),
            Arc::clone(&stats),
            shutdown.clone(),
        ));
        let dispatcher = Arc::new(ProxyDispatcher::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&scheduler),
            transport,
            Arc::clone(&stats),
            shutdown.clone(),
        ));

        tracing::info!(
            bundling = config.bundling_enabled,
            priority = config.priority_enabled,
            dynamic = config.dynamic_bundling_enabled,
            cache = config.cache_enabled,
            endpoint = %config.bundle_endpoint,
            "proxy created"
        );

        Self { config, cache, registry, scheduler, dispatcher, stats, shutdown }
    }

    /// Route a request and return its handle.
    pub fn dispatch(&self, request: Request) -> RequestHandle {
        let (reply, rx) = Reply::channel();
        let target = self.dispatcher.dispatch(request, reply);
        RequestHandle::new(rx, target)
    }

    /// Send a request through the priority scheduler, bypassing transactions.
    pub fn dispatch_with_priority(&self, request: Request) -> RequestHandle {
        let path = if request.low_priority {
            DispatchPath::PriorityQueued
        } else {
            DispatchPath::PriorityImmediate
        };
        telemetry::record_dispatch(path);
        let (reply, rx) = Reply::channel();
        let target = self.scheduler.submit(request, reply);
        RequestHandle::new(rx, target)
    }

    pub fn begin_transaction(&self) -> TransactionId {
        self.registry.begin()
    }

    /// Commit a transaction. Unknown ids are logged and reported, never fatal.
    pub fn commit_transaction(&self, tid: TransactionId) -> Result<(), ProxyError> {
        if self.registry.commit(tid) {
            Ok(())
        } else {
            Err(ProxyError::UnknownTransaction(tid))
        }
    }

    /// Drop a transaction without sending anything.
    pub fn abort_transaction(&self, tid: TransactionId) -> Result<(), ProxyError> {
        if self.registry.abort(tid) {
            Ok(())
        } else {
            tracing::warn!(transaction_id = %tid, "abort of unknown transaction ignored");
            Err(ProxyError::UnknownTransaction(tid))
        }
    }

    /// Issue every queued low-priority request now.
    pub fn flush_low_priority(&self) -> usize {
        self.scheduler.flush_now()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Clear every table, cancel every timer and zero the counters.
    ///
    /// Requests still pending anywhere observe `ProxyError::Unresolved`.
    /// Calls already handed to the transport complete normally.
    pub fn reset(&self) {
        self.dispatcher.reset();
        self.scheduler.clear();
        self.registry.clear();
        self.cache.clear();
        self.stats.reset();
        tracing::debug!("proxy reset");
    }

    /// Stop every timer task. Queued and deferred work is never issued
    /// afterwards; calls already in flight complete normally. Transactions
    /// waiting out a deferred commit are dropped, so their callers observe
    /// `ProxyError::Unresolved`.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("proxy shutting down");
            self.shutdown.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &PriorityScheduler {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &ProxyDispatcher {
        &self.dispatcher
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
