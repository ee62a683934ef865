//! In-process transport that records every call and answers from a closure.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use super::{Transport, TransportError, TransportFuture, TransportResponse, WireRequest};

/// Produces the outcome of a recorded call.
pub type Responder =
    Arc<dyn Fn(&WireRequest) -> Result<TransportResponse, TransportError> + Send + Sync>;

/// Transport double: records calls in order, answers through a [`Responder`]
/// after an optional latency.
pub struct RecordingTransport {
    calls: Mutex<Vec<WireRequest>>,
    responder: Responder,
    latency: Option<Duration>,
}

impl RecordingTransport {
    pub fn new(responder: Responder) -> Self {
        Self { calls: Mutex::new(Vec::new()), responder, latency: None }
    }

    /// Answers every call with `200 OK` and a body echoing method and url.
    ///
    /// Bundle calls are answered per entry, so each member receives its own echo.
    pub fn echo(bundle_endpoint: impl Into<String>) -> Self {
        let endpoint = bundle_endpoint.into();
        Self::new(Arc::new(move |req: &WireRequest| {
            if req.url == endpoint {
                Ok(TransportResponse::ok(echo_bundle(req)))
            } else {
                Ok(TransportResponse::ok(json!({ "url": req.url, "type": req.method })))
            }
        }))
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Snapshot of the calls received so far, in order.
    pub fn calls(&self) -> Vec<WireRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

fn echo_bundle(req: &WireRequest) -> serde_json::Value {
    let mut responses = serde_json::Map::new();
    let entries = req
        .body
        .as_ref()
        .and_then(|b| b.get("requests"))
        .and_then(|r| r.as_object());
    if let Some(entries) = entries {
        for (rid, entry) in entries {
            responses.insert(
                rid.clone(),
                json!({ "url": entry.get("url"), "type": entry.get("type") }),
            );
        }
    }
    json!({ "responses": responses })
}

impl Transport for RecordingTransport {
    fn send(&self, request: WireRequest) -> TransportFuture {
        tracing::trace!(url = %request.url, method = %request.method, "transport call recorded");
        let outcome = (self.responder)(&request);
        self.calls.lock().push(request);
        let latency = self.latency;
        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            outcome
        })
    }
}
