//! Open transactions and the requests pending inside them.
//!
//! The registry exclusively owns open transactions. A transaction is closed
//! the moment its requests are handed to the executor; results from then on
//! travel through each request's own reply channel.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::bundle::BundleExecutor;
use crate::request::{Reply, Request, RequestId, TransactionId};
use crate::telemetry::StatsStore;

/// A request waiting in a transaction, together with its reply channel.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) request: Request,
    pub(crate) reply: Reply,
}

/// Pending requests of one transaction, keyed by request id.
pub(crate) type PendingMap = BTreeMap<RequestId, PendingRequest>;

/// Tracks open transactions.
pub struct TransactionRegistry {
    transactions: Mutex<HashMap<TransactionId, PendingMap>>,
    // Ids come from monotonically increasing counters and are never reused,
    // so a deferred commit can never land on a newer transaction.
    next_transaction: AtomicU64,
    next_request: AtomicU64,
    executor: Arc<BundleExecutor>,
    /// Delay applied to low-priority-only transactions; `None` when priority
    /// scheduling is disabled.
    low_priority_delay: Option<Duration>,
    stats: Arc<StatsStore>,
    shutdown: CancellationToken,
}

impl TransactionRegistry {
    pub(crate) fn new(
        executor: Arc<BundleExecutor>,
        low_priority_delay: Option<Duration>,
        stats: Arc<StatsStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transactions: Mutex::new(HashMap::new()),
            next_transaction: AtomicU64::new(1),
            next_request: AtomicU64::new(1),
            executor,
            low_priority_delay,
            stats,
            shutdown,
        }
    }

    /// Open a new, empty transaction.
    pub fn begin(&self) -> TransactionId {
        let tid = TransactionId::from_raw(self.next_transaction.fetch_add(1, Ordering::SeqCst));
        self.transactions.lock().insert(tid, PendingMap::new());
        self.stats.transaction_begun();
        tracing::debug!(transaction_id = %tid, "transaction opened");
        tid
    }

    /// Register a request in an open transaction.
    ///
    /// Hands the request back if the transaction does not exist.
    pub(crate) fn add(
        &self,
        tid: TransactionId,
        request: Request,
        reply: Reply,
    ) -> Result<RequestId, (Request, Reply)> {
        let mut transactions = self.transactions.lock();
        let Some(pending) = transactions.get_mut(&tid) else {
            tracing::debug!(transaction_id = %tid, url = %request.url, "add to unknown transaction ignored");
            return Err((request, reply));
        };
        let rid = RequestId::from_raw(self.next_request.fetch_add(1, Ordering::SeqCst));
        tracing::trace!(transaction_id = %tid, request_id = %rid, url = %request.url, "request joined transaction");
        pending.insert(rid, PendingRequest { request, reply });
        drop(transactions);

        self.stats.transaction_request();
        Ok(rid)
    }

    /// Remove a pending request. Returns true if it was still pending.
    pub fn remove_request(&self, tid: TransactionId, rid: RequestId) -> bool {
        let removed = self
            .transactions
            .lock()
            .get_mut(&tid)
            .and_then(|pending| pending.remove(&rid))
            .is_some();
        if removed {
            tracing::debug!(transaction_id = %tid, request_id = %rid, "pending request aborted");
        }
        removed
    }

    pub fn is_open(&self, tid: TransactionId) -> bool {
        self.transactions.lock().contains_key(&tid)
    }

    /// Number of requests pending in `tid`, or `None` if it is not open.
    pub fn pending_count(&self, tid: TransactionId) -> Option<usize> {
        self.transactions.lock().get(&tid).map(|p| p.len())
    }

    pub fn open_transactions(&self) -> usize {
        self.transactions.lock().len()
    }

    /// Commit a transaction. Returns false if it is not open.
    ///
    /// With priority scheduling on, a transaction whose pending requests are
    /// all low priority is handed off after the low-priority delay; anything
    /// else is handed off immediately.
    pub fn commit(self: &Arc<Self>, tid: TransactionId) -> bool {
        let defer = {
            let transactions = self.transactions.lock();
            let Some(pending) = transactions.get(&tid) else {
                tracing::warn!(transaction_id = %tid, "commit of unknown transaction ignored");
                return false;
            };
            match self.low_priority_delay {
                Some(delay) if !pending.is_empty() && pending.values().all(|p| p.request.low_priority) => {
                    Some(delay)
                }
                _ => None,
            }
        };

        match defer {
            Some(delay) => {
                tracing::debug!(transaction_id = %tid, delay_ms = delay.as_millis() as u64, "low-priority transaction commit deferred");
                let registry = Arc::downgrade(self);
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        () = shutdown.cancelled() => {
                            if let Some(registry) = registry.upgrade() {
                                registry.discard(tid);
                            }
                        }
                        () = tokio::time::sleep(delay) => {
                            if let Some(registry) = registry.upgrade() {
                                registry.hand_off(tid);
                            }
                        }
                    }
                });
            }
            None => self.hand_off(tid),
        }
        true
    }

    /// Close the transaction and pass its requests to the executor.
    fn hand_off(&self, tid: TransactionId) {
        let Some(pending) = self.transactions.lock().remove(&tid) else {
            return;
        };
        tracing::info!(transaction_id = %tid, requests = pending.len(), "transaction committed");
        self.stats.transaction_committed();
        self.executor.execute(tid, pending);
    }

    /// Drop a deferred transaction that will never be handed off. Its
    /// callers observe `ProxyError::Unresolved`.
    fn discard(&self, tid: TransactionId) {
        if let Some(pending) = self.transactions.lock().remove(&tid) {
            tracing::debug!(transaction_id = %tid, requests = pending.len(), "deferred transaction dropped on shutdown");
        }
    }

    /// Drop a transaction without executing anything. Its callers observe
    /// `ProxyError::Unresolved`.
    pub fn abort(&self, tid: TransactionId) -> bool {
        let removed = self.transactions.lock().remove(&tid);
        match removed {
            Some(pending) => {
                tracing::debug!(transaction_id = %tid, requests = pending.len(), "transaction aborted");
                true
            }
            None => false,
        }
    }

    /// Drop every open transaction.
    pub fn clear(&self) {
        self.transactions.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot::error::TryRecvError;

    use crate::proxy::ResponseCache;
    use crate::transport::{RecordingTransport, Transport};

    fn registry(delay: Option<Duration>) -> (Arc<TransactionRegistry>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::echo("/bundle"));
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let stats = Arc::new(StatsStore::new());
        let cache = Arc::new(ResponseCache::new(false, Duration::from_secs(1)));
        let executor = Arc::new(BundleExecutor::new(dyn_transport, cache, Arc::clone(&stats), "/bundle"));
        let registry = Arc::new(TransactionRegistry::new(executor, delay, stats, CancellationToken::new()));
        (registry, transport)
    }

    #[tokio::test]
    async fn ids_are_unique_and_monotonic() {
        let (registry, _) = registry(None);
        let t1 = registry.begin();
        let t2 = registry.begin();
        assert!(t2 > t1);

        let (reply, _rx) = Reply::channel();
        let r1 = registry.add(t1, Request::get("/a"), reply).unwrap();
        let (reply, _rx) = Reply::channel();
        let r2 = registry.add(t2, Request::get("/b"), reply).unwrap();
        assert!(r2 > r1);
    }

    #[tokio::test]
    async fn add_to_unknown_transaction_hands_request_back() {
        let (registry, _) = registry(None);
        let (reply, _rx) = Reply::channel();
        let tid = TransactionId::from_raw(99);
        let (request, _reply) = registry.add(tid, Request::get("/a"), reply).unwrap_err();
        assert_eq!(request.url, "/a");
        assert!(!registry.commit(tid));
    }

    #[tokio::test]
    async fn commit_closes_transaction() {
        let (registry, transport) = registry(None);
        let tid = registry.begin();
        let (reply, _rx) = Reply::channel();
        registry.add(tid, Request::get("/a"), reply).unwrap();

        assert!(registry.commit(tid));
        assert!(!registry.is_open(tid));
        assert_eq!(transport.call_count(), 1);
        assert!(!registry.commit(tid), "second commit is a no-op");
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn abort_drops_requests_unresolved() {
        let (registry, transport) = registry(None);
        let tid = registry.begin();
        let (reply, mut rx) = Reply::channel();
        registry.add(tid, Request::get("/a"), reply).unwrap();

        assert!(registry.abort(tid));
        assert!(!registry.abort(tid));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Closed)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn low_priority_only_commit_is_deferred() {
        let (registry, transport) = registry(Some(Duration::from_millis(3001)));
        let tid = registry.begin();
        let (reply, _rx) = Reply::channel();
        registry.add(tid, Request::get("/a").low_priority(), reply).unwrap();

        assert!(registry.commit(tid));
        assert!(registry.is_open(tid), "still open during the delay");
        assert_eq!(transport.call_count(), 0);

        tokio::time::sleep(Duration::from_millis(3002)).await;
        assert!(!registry.is_open(tid));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_deferred_transaction() {
        let transport: Arc<dyn Transport> = Arc::new(RecordingTransport::echo("/bundle"));
        let stats = Arc::new(StatsStore::new());
        let cache = Arc::new(ResponseCache::new(false, Duration::from_secs(1)));
        let executor = Arc::new(BundleExecutor::new(Arc::clone(&transport), cache, Arc::clone(&stats), "/bundle"));
        let shutdown = CancellationToken::new();
        let registry = Arc::new(TransactionRegistry::new(
            executor,
            Some(Duration::from_millis(3001)),
            stats,
            shutdown.clone(),
        ));

        let tid = registry.begin();
        let (reply, rx) = Reply::channel();
        registry.add(tid, Request::get("/a").low_priority(), reply).unwrap();
        assert!(registry.commit(tid));

        shutdown.cancel();
        assert!(rx.await.is_err(), "reply dropped without a value");
        assert!(!registry.is_open(tid));
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_priority_commit_is_immediate() {
        let (registry, transport) = registry(Some(Duration::from_millis(3001)));
        let tid = registry.begin();
        let (reply, _rx1) = Reply::channel();
        registry.add(tid, Request::get("/a").low_priority(), reply).unwrap();
        let (reply, _rx2) = Reply::channel();
        registry.add(tid, Request::get("/b"), reply).unwrap();

        registry.commit(tid);
        assert_eq!(transport.call_count(), 1);
        assert_eq!(transport.calls()[0].url, "/bundle");
    }
}
