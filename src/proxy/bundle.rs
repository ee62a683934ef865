//! Turns a committed transaction into one wire call and routes the result
//! back to each caller.
//!
//! Members answered by the cache never reach the wire. A single remaining
//! member goes out as a plain pass-through call; two or more are posted to
//! the bundle endpoint and demultiplexed by request id.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;

use super::cache::ResponseCache;
use super::registry::{PendingMap, PendingRequest};
use super::wire::{classify_entry, decode_bundle_response, BundleItem, BundleRequest, EntryOutcome};
use crate::error::ProxyError;
use crate::request::{Method, RequestId, Response, ResponseSource, TransactionId};
use crate::telemetry::{self, BundleKind, ItemOutcome, RequestSpan, SpanExt, StatsStore};
use crate::transport::{issue, Transport, TransportError, TransportResponse, WireRequest};

pub struct BundleExecutor {
    transport: Arc<dyn Transport>,
    cache: Arc<ResponseCache>,
    stats: Arc<StatsStore>,
    bundle_endpoint: String,
}

impl BundleExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<ResponseCache>,
        stats: Arc<StatsStore>,
        bundle_endpoint: impl Into<String>,
    ) -> Self {
        Self { transport, cache, stats, bundle_endpoint: bundle_endpoint.into() }
    }

    pub fn bundle_endpoint(&self) -> &str {
        &self.bundle_endpoint
    }

    /// Execute the pending requests of a closed transaction.
    pub(crate) fn execute(&self, tid: TransactionId, mut pending: PendingMap) {
        if pending.is_empty() {
            return;
        }

        self.resolve_from_cache(&mut pending);

        match pending.len() {
            0 => {
                tracing::debug!(transaction_id = %tid, "transaction fully served from cache");
            }
            1 => {
                if let Some((rid, member)) = pending.pop_first() {
                    self.pass_through(tid, rid, member);
                }
            }
            _ => self.bundle(tid, pending),
        }
    }

    fn resolve_from_cache(&self, pending: &mut PendingMap) {
        if !self.cache.is_enabled() {
            return;
        }
        let hits: Vec<(RequestId, Value)> = pending
            .iter()
            .filter_map(|(rid, member)| {
                let hit = self.cache.lookup(&member.request.url);
                self.stats.cache_lookup(hit.is_some());
                telemetry::record_cache_lookup(hit.is_some());
                hit.map(|payload| (*rid, payload))
            })
            .collect();

        for (rid, payload) in hits {
            if let Some(member) = pending.remove(&rid) {
                tracing::trace!(request_id = %rid, url = %member.request.url, "served from cache");
                member.reply.resolve(Ok(Response::new(payload, ResponseSource::Cache)));
            }
        }
    }

    fn pass_through(&self, tid: TransactionId, rid: RequestId, member: PendingRequest) {
        let PendingRequest { request, reply } = member;
        tracing::debug!(transaction_id = %tid, request_id = %rid, url = %request.url, "single request sent as pass-through");
        self.stats.pass_through_call();
        telemetry::record_bundle_call(BundleKind::PassThrough, 1);

        let wire = WireRequest::new(request.method, request.url.clone(), request.data);
        let span = RequestSpan::bundle(tid, &request.url, 1);
        let url = request.url;
        let cache = Arc::clone(&self.cache);
        let stats = Arc::clone(&self.stats);
        let started = Instant::now();

        // No cancellation path once committed: the abort handle is dropped.
        issue(&self.transport, wire, move |outcome| {
            let _enter = span.enter();
            span.record("latency_ms", started.elapsed().as_millis() as u64);
            span.record_result(&outcome);
            match outcome {
                Ok(response) => {
                    cache.store(&url, response.body.clone());
                    reply.resolve(Ok(Response::from_transport(response, ResponseSource::Network)));
                }
                Err(err) => {
                    stats.transport_failure();
                    reply.resolve(Err(err.into()));
                }
            }
        });
    }

    fn bundle(&self, tid: TransactionId, pending: PendingMap) {
        let members = pending.len();
        let mut bundle = BundleRequest::default();
        for (rid, member) in &pending {
            bundle.requests.insert(*rid, BundleItem::from_request(&member.request));
        }
        let body = match bundle.to_value() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(transaction_id = %tid, error = %e, "failed to encode bundle");
                fail_all(pending, &ProxyError::Parse { status: 0, message: e.to_string() });
                return;
            }
        };

        tracing::debug!(transaction_id = %tid, members, endpoint = %self.bundle_endpoint, "sending bundle");
        self.stats.bundle_call(members);
        telemetry::record_bundle_call(BundleKind::Bundle, members);

        let mut wire = WireRequest::new(Method::Post, self.bundle_endpoint.clone(), Some(body));
        wire.content_type = Some("application/json".to_string());
        wire.no_cache = true;

        let span = RequestSpan::bundle(tid, &self.bundle_endpoint, members);
        let cache = Arc::clone(&self.cache);
        let stats = Arc::clone(&self.stats);
        let started = Instant::now();

        issue(&self.transport, wire, move |outcome| {
            let _enter = span.enter();
            span.record("latency_ms", started.elapsed().as_millis() as u64);
            span.record_result(&outcome);
            complete_bundle(tid, pending, outcome, &cache, &stats);
        });
    }
}

/// Route a bundle outcome to every member.
fn complete_bundle(
    tid: TransactionId,
    mut pending: PendingMap,
    outcome: Result<TransportResponse, TransportError>,
    cache: &ResponseCache,
    stats: &StatsStore,
) {
    let response = match outcome {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(transaction_id = %tid, status = err.status, error = %err, "bundle call failed");
            stats.transport_failure();
            fail_all(pending, &err.into());
            return;
        }
    };

    let status = response.status;
    let responses = match decode_bundle_response(response.body) {
        Ok(Some(responses)) => responses,
        Ok(None) => {
            tracing::warn!(transaction_id = %tid, "bundle response carries no responses object");
            Default::default()
        }
        Err(e) => {
            tracing::warn!(transaction_id = %tid, error = %e, "bundle response could not be parsed");
            stats.transport_failure();
            fail_all(pending, &ProxyError::Parse { status, message: e.to_string() });
            return;
        }
    };

    for (key, entry) in responses {
        let member = key.parse::<RequestId>().ok().and_then(|rid| pending.remove(&rid));
        let Some(member) = member else {
            tracing::debug!(transaction_id = %tid, key = %key, "bundle response entry matches no pending request");
            continue;
        };
        match classify_entry(entry) {
            EntryOutcome::Success(payload) => {
                telemetry::record_bundle_item(ItemOutcome::Success);
                cache.store(&member.request.url, payload.clone());
                member.reply.resolve(Ok(Response::new(payload, ResponseSource::Bundle)));
            }
            EntryOutcome::Failed { code, status_text, payload } => {
                telemetry::record_bundle_item(ItemOutcome::Failed);
                stats.item_failure();
                member.reply.resolve(Err(ProxyError::ItemFailed { code, status_text, payload }));
            }
        }
    }

    if !pending.is_empty() {
        let missing: Vec<String> = pending.keys().map(ToString::to_string).collect();
        tracing::warn!(
            transaction_id = %tid,
            missing = ?missing,
            "bundle response omitted requests; they stay unresolved"
        );
        for _ in &missing {
            telemetry::record_bundle_item(ItemOutcome::Missing);
        }
        stats.unresolved(missing.len());
    }
}

fn fail_all(pending: PendingMap, error: &ProxyError) {
    for member in pending.into_values() {
        member.reply.resolve(Err(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::oneshot;

    use crate::request::{ProxyResult, Reply, Request};

    fn pending_of(requests: Vec<Request>) -> (PendingMap, Vec<oneshot::Receiver<ProxyResult>>) {
        let mut pending = PendingMap::new();
        let mut receivers = Vec::new();
        for (i, request) in requests.into_iter().enumerate() {
            let (reply, rx) = Reply::channel();
            pending.insert(RequestId::from_raw(i as u64 + 1), PendingRequest { request, reply });
            receivers.push(rx);
        }
        (pending, receivers)
    }

    #[test]
    fn transport_failure_reaches_every_member() {
        let (pending, mut receivers) = pending_of(vec![Request::get("/a"), Request::get("/b")]);
        let cache = ResponseCache::new(true, Duration::from_secs(5));
        let stats = StatsStore::new();
        complete_bundle(
            TransactionId::from_raw(1),
            pending,
            Err(TransportError::new(503, "Service Unavailable", "maintenance")),
            &cache,
            &stats,
        );

        for rx in &mut receivers {
            let err = rx.try_recv().unwrap().unwrap_err();
            assert_eq!(err.status(), Some(503));
            assert!(err.is_transport_level());
        }
        assert!(cache.is_empty());
        assert_eq!(stats.snapshot().transport_failures, 1);
    }

    #[test]
    fn unparseable_body_fails_every_member_with_parse_error() {
        let (pending, mut receivers) = pending_of(vec![Request::get("/a"), Request::get("/b")]);
        let cache = ResponseCache::new(true, Duration::from_secs(5));
        let stats = StatsStore::new();
        complete_bundle(
            TransactionId::from_raw(1),
            pending,
            Ok(TransportResponse::ok(json!("<html>oops</html>"))),
            &cache,
            &stats,
        );

        for rx in &mut receivers {
            assert!(matches!(
                rx.try_recv().unwrap(),
                Err(ProxyError::Parse { status: 200, .. })
            ));
        }
    }

    #[test]
    fn missing_and_unknown_entries() {
        let (pending, mut receivers) = pending_of(vec![Request::get("/a"), Request::get("/b")]);
        let cache = ResponseCache::new(true, Duration::from_secs(5));
        let stats = StatsStore::new();
        complete_bundle(
            TransactionId::from_raw(1),
            pending,
            Ok(TransportResponse::ok(json!({"responses": {"r1": {"v": 1}, "r77": {"v": 2}, "junk": 3}}))),
            &cache,
            &stats,
        );

        assert_eq!(receivers[0].try_recv().unwrap().unwrap().data, json!({"v": 1}));
        assert!(matches!(
            receivers[1].try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert_eq!(stats.snapshot().unresolved, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn body_without_responses_leaves_everyone_unresolved() {
        let (pending, mut receivers) = pending_of(vec![Request::get("/a"), Request::get("/b")]);
        let cache = ResponseCache::new(false, Duration::from_secs(5));
        let stats = StatsStore::new();
        complete_bundle(
            TransactionId::from_raw(4),
            pending,
            Ok(TransportResponse::ok(json!({"ok": true}))),
            &cache,
            &stats,
        );
        for rx in &mut receivers {
            assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
        }
        assert_eq!(stats.snapshot().unresolved, 2);
    }
}
