//! Single entry point routing each request to a transaction, the priority
//! scheduler or the transport.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::priority::PriorityScheduler;
use super::registry::TransactionRegistry;
use super::send_direct;
use super::timer::Timer;
use crate::config::ProxyConfig;
use crate::request::{AbortTarget, Reply, Request, TransactionId};
use crate::telemetry::{self, DispatchPath, StatsStore};
use crate::transport::Transport;

/// The implicit transaction collecting near-simultaneous requests.
#[derive(Default)]
struct DynamicWindow {
    transaction_id: Option<TransactionId>,
    timer: Timer,
}

pub struct ProxyDispatcher {
    bundling: bool,
    priority: bool,
    dynamic: bool,
    window_length: Duration,
    window: Mutex<DynamicWindow>,
    registry: Arc<TransactionRegistry>,
    scheduler: Arc<PriorityScheduler>,
    transport: Arc<dyn Transport>,
    stats: Arc<StatsStore>,
    shutdown: CancellationToken,
}

impl ProxyDispatcher {
    pub(crate) fn new(
        config: &ProxyConfig,
        registry: Arc<TransactionRegistry>,
        scheduler: Arc<PriorityScheduler>,
        transport: Arc<dyn Transport>,
        stats: Arc<StatsStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bundling: config.bundling_enabled,
            priority: config.priority_enabled,
            dynamic: config.dynamic_bundling_enabled,
            window_length: config.dynamic_window(),
            window: Mutex::new(DynamicWindow::default()),
            registry,
            scheduler,
            transport,
            stats,
            shutdown,
        }
    }

    /// Route a request.
    ///
    /// An asynchronous request tagged with an open transaction joins it.
    /// Otherwise, with dynamic batching on, an asynchronous request joins the
    /// live dynamic window (opening one if needed). Everything else goes to
    /// the priority scheduler when enabled, or straight to the transport.
    pub(crate) fn dispatch(self: &Arc<Self>, request: Request, reply: Reply) -> AbortTarget {
        let (request, reply) = match self.join_explicit(request, reply) {
            Ok(target) => return target,
            Err(pair) => pair,
        };

        let (request, reply) = if self.bundling && self.dynamic && request.asynchronous {
            match self.join_dynamic(request, reply) {
                Ok(target) => return target,
                Err(pair) => pair,
            }
        } else {
            (request, reply)
        };

        if self.priority {
            let path = if request.low_priority {
                DispatchPath::PriorityQueued
            } else {
                DispatchPath::PriorityImmediate
            };
            telemetry::record_dispatch(path);
            return self.scheduler.submit(request, reply);
        }

        tracing::debug!(url = %request.url, method = %request.method, "direct call");
        self.stats.direct_call();
        telemetry::record_dispatch(DispatchPath::Direct);
        AbortTarget::InFlight(send_direct(&self.transport, &self.stats, request, reply))
    }

    fn join_explicit(&self, request: Request, reply: Reply) -> Result<AbortTarget, (Request, Reply)> {
        let Some(tid) = request.transaction_id else {
            return Err((request, reply));
        };
        if !self.bundling || !request.asynchronous {
            return Err((request, reply));
        }
        let rid = self.registry.add(tid, request, reply)?;
        telemetry::record_dispatch(DispatchPath::Transaction);
        Ok(AbortTarget::Transaction {
            registry: Arc::downgrade(&self.registry),
            transaction_id: tid,
            request_id: rid,
        })
    }

    fn join_dynamic(self: &Arc<Self>, mut request: Request, reply: Reply) -> Result<AbortTarget, (Request, Reply)> {
        // The window lock is held across the add so the closer cannot commit
        // the window between tagging and registration.
        let mut window = self.window.lock();
        let tid = match window.transaction_id {
            Some(tid) => tid,
            None => self.open_window(&mut window),
        };
        request.transaction_id = Some(tid);
        let rid = self.registry.add(tid, request, reply)?;
        drop(window);

        telemetry::record_dispatch(DispatchPath::Transaction);
        Ok(AbortTarget::Transaction {
            registry: Arc::downgrade(&self.registry),
            transaction_id: tid,
            request_id: rid,
        })
    }

    fn open_window(self: &Arc<Self>, window: &mut DynamicWindow) -> TransactionId {
        let tid = self.registry.begin();
        window.transaction_id = Some(tid);
        let dispatcher = Arc::downgrade(self);
        window.timer.schedule(self.window_length, &self.shutdown, move |generation| {
            if let Some(dispatcher) = dispatcher.upgrade() {
                dispatcher.close_window(generation);
            }
        });
        self.stats.dynamic_window();
        tracing::debug!(transaction_id = %tid, window_ms = self.window_length.as_millis() as u64, "dynamic window opened");
        tid
    }

    fn close_window(&self, generation: u64) {
        let tid = {
            let mut window = self.window.lock();
            if !window.timer.claim(generation) {
                return;
            }
            window.transaction_id.take()
        };
        if let Some(tid) = tid {
            tracing::debug!(transaction_id = %tid, "dynamic window closed");
            self.registry.commit(tid);
        }
    }

    /// Transaction of the live dynamic window, if any.
    pub fn dynamic_transaction(&self) -> Option<TransactionId> {
        self.window.lock().transaction_id
    }

    /// Cancel the dynamic window without committing it.
    pub(crate) fn reset(&self) {
        let mut window = self.window.lock();
        window.timer.cancel();
        window.transaction_id = None;
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
