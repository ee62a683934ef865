//! Transport seam: the only I/O boundary of the proxy.
//!
//! A [`Transport`] registers a call synchronously in [`Transport::send`] and
//! completes it through the returned future. Dropping the future cancels the
//! call if it is still outstanding.

mod recording;

pub use recording::{RecordingTransport, Responder};

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::task::AbortHandle;

use crate::request::Method;

/// A single call handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub url: String,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Ask intermediaries not to serve this call from a cache.
    #[serde(default)]
    pub no_cache: bool,
}

impl WireRequest {
    pub fn new(method: Method, url: impl Into<String>, body: Option<Value>) -> Self {
        Self { url: url.into(), method, body, content_type: None, no_cache: false }
    }
}

/// A completed call with a 2xx status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    /// Response body. Legacy endpoints may deliver JSON as a `Value::String`.
    pub body: Value,
}

impl TransportResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, status_text: "OK".to_string(), body }
    }
}

/// A failed call: network error or non-2xx status.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{status} {status_text}: {message}")]
pub struct TransportError {
    pub status: u16,
    pub status_text: String,
    pub message: String,
}

impl TransportError {
    pub fn new(status: u16, status_text: impl Into<String>, message: impl Into<String>) -> Self {
        Self { status, status_text: status_text.into(), message: message.into() }
    }
}

/// Completion of a transport call.
pub type TransportFuture = BoxFuture<'static, Result<TransportResponse, TransportError>>;

/// Performs network I/O on behalf of the proxy.
pub trait Transport: Send + Sync {
    fn send(&self, request: WireRequest) -> TransportFuture;
}

/// Send `request` and run `on_complete` with the outcome on a spawned task.
///
/// The call is registered with the transport before this returns, so calls
/// issued in sequence reach the transport in that order. The returned handle
/// cancels the outstanding call.
pub(crate) fn issue<F>(transport: &Arc<dyn Transport>, request: WireRequest, on_complete: F) -> AbortHandle
where
    F: FnOnce(Result<TransportResponse, TransportError>) + Send + 'static,
{
    let call = transport.send(request);
    let task = tokio::spawn(async move {
        on_complete(call.await);
    });
    task.abort_handle()
}
