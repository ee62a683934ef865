//! Two-tier request scheduling.
//!
//! Normal requests go out immediately and push back the low-priority flush.
//! Low-priority requests wait in a FIFO queue until the flush timer fires,
//! then go out in submission order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::send_direct;
use super::timer::Timer;
use crate::request::{AbortTarget, Reply, Request};
use crate::telemetry::{self, StatsStore};
use crate::transport::Transport;

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<(Request, Reply)>,
    timer: Timer,
}

/// Owns the low-priority queue and its flush timer.
pub struct PriorityScheduler {
    state: Mutex<SchedulerState>,
    transport: Arc<dyn Transport>,
    flush_delay: Duration,
    stats: Arc<StatsStore>,
    shutdown: CancellationToken,
}

impl PriorityScheduler {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        flush_delay: Duration,
        stats: Arc<StatsStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state: Mutex::new(SchedulerState::default()),
            transport,
            flush_delay,
            stats,
            shutdown,
        }
    }

    pub fn flush_delay(&self) -> Duration {
        self.flush_delay
    }

    /// Route one request by its priority.
    pub(crate) fn submit(self: &Arc<Self>, request: Request, reply: Reply) -> AbortTarget {
        if request.low_priority {
            let mut state = self.state.lock();
            tracing::debug!(url = %request.url, queued = state.queue.len() + 1, "low-priority request queued");
            state.queue.push_back((request, reply));
            if !state.timer.is_armed() {
                self.arm(&mut state);
            }
            drop(state);
            self.stats.low_priority_queued();
            return AbortTarget::Detached;
        }

        // A normal request cuts in line: the flush window restarts after it.
        let mut state = self.state.lock();
        state.timer.cancel();
        tracing::debug!(url = %request.url, "normal-priority request issued");
        let handle = send_direct(&self.transport, &self.stats, request, reply);
        self.arm(&mut state);
        drop(state);

        self.stats.priority_immediate();
        AbortTarget::InFlight(handle)
    }

    fn arm(self: &Arc<Self>, state: &mut SchedulerState) {
        let scheduler = Arc::downgrade(self);
        state.timer.schedule(self.flush_delay, &self.shutdown, move |generation| {
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.on_timer(generation);
            }
        });
    }

    fn on_timer(&self, generation: u64) {
        let drained = {
            let mut state = self.state.lock();
            if !state.timer.claim(generation) {
                return;
            }
            std::mem::take(&mut state.queue)
        };
        self.issue_all(drained);
    }

    /// Drain the queue now, cancelling the flush timer. Returns the number of
    /// requests issued.
    pub fn flush_now(&self) -> usize {
        let drained = {
            let mut state = self.state.lock();
            state.timer.cancel();
            std::mem::take(&mut state.queue)
        };
        let count = drained.len();
        self.issue_all(drained);
        count
    }

    fn issue_all(&self, drained: VecDeque<(Request, Reply)>) {
        if drained.is_empty() {
            tracing::trace!("low-priority flush with empty queue");
            return;
        }
        let count = drained.len();
        tracing::info!(count, "flushing low-priority queue");
        for (request, reply) in drained {
            // Queued requests have no abort path, so the handle is dropped.
            let _ = send_direct(&self.transport, &self.stats, request, reply);
        }
        self.stats.low_priority_flushed(count);
        telemetry::record_low_priority_flush(count);
    }

    pub fn queued_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().timer.is_armed()
    }

    /// Cancel the timer and drop every queued request unresolved.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.timer.cancel();
        state.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    use crate::request::ProxyResult;
    use crate::transport::RecordingTransport;

    const DELAY: Duration = Duration::from_millis(3001);

    fn scheduler() -> (Arc<PriorityScheduler>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::echo("/bundle"));
        let scheduler = Arc::new(PriorityScheduler::new(
            transport.clone(),
            DELAY,
            Arc::new(StatsStore::new()),
            CancellationToken::new(),
        ));
        (scheduler, transport)
    }

    fn submit(scheduler: &Arc<PriorityScheduler>, request: Request) -> (AbortTarget, oneshot::Receiver<ProxyResult>) {
        let (reply, rx) = Reply::channel();
        (scheduler.submit(request, reply), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn low_priority_waits_for_flush() {
        let (scheduler, transport) = scheduler();
        let (target, _rx) = submit(&scheduler, Request::get("/l1").low_priority());
        assert!(matches!(target, AbortTarget::Detached));
        assert_eq!(transport.call_count(), 0);
        assert!(scheduler.is_armed());

        tokio::time::sleep(DELAY + Duration::from_millis(1)).await;
        assert_eq!(transport.call_count(), 1);
        assert_eq!(scheduler.queued_len(), 0);
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn normal_request_resets_flush_window() {
        let (scheduler, transport) = scheduler();
        let (_t, _rx1) = submit(&scheduler, Request::get("/low").low_priority());
        tokio::time::sleep(Duration::from_millis(2000)).await;

        let (target, _rx2) = submit(&scheduler, Request::get("/normal"));
        assert!(matches!(target, AbortTarget::InFlight(_)));
        assert_eq!(transport.calls()[0].url, "/normal");

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(transport.call_count(), 1, "window restarted by the normal request");

        tokio::time::sleep(Duration::from_millis(1002)).await;
        assert_eq!(transport.call_count(), 2);
        assert_eq!(transport.calls()[1].url, "/low");
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_drains_in_order() {
        let (scheduler, transport) = scheduler();
        let mut receivers = Vec::new();
        for url in ["/l1", "/l2", "/l3"] {
            receivers.push(submit(&scheduler, Request::get(url).low_priority()).1);
        }
        assert_eq!(scheduler.flush_now(), 3);
        let urls: Vec<String> = transport.calls().into_iter().map(|c| c.url).collect();
        assert_eq!(urls, ["/l1", "/l2", "/l3"]);
        assert!(!scheduler.is_armed());

        for rx in receivers {
            assert!(rx.await.unwrap().is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clear_drops_queue_unresolved() {
        let (scheduler, transport) = scheduler();
        let (_t, rx) = submit(&scheduler, Request::get("/l1").low_priority());
        scheduler.clear();
        assert!(rx.await.is_err());
        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(transport.call_count(), 0);
    }
}
