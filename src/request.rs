//! Request descriptors, identifiers and caller-side handles.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::ProxyError;
use crate::proxy::TransactionRegistry;
use crate::transport::TransportResponse;

/// Outcome delivered to the caller of a dispatched request.
pub type ProxyResult = Result<Response, ProxyError>;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw counter value. Ids handed out by the proxy are never reused.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.strip_prefix($prefix)
                    .and_then(|n| n.parse::<u64>().ok())
                    .map(Self)
                    .ok_or_else(|| format!(concat!("invalid ", stringify!($name), ": {:?}"), s))
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_string()
            }
        }
    };
}

opaque_id!(
    /// Opaque transaction token, rendered as `t<n>`.
    TransactionId,
    "t"
);

opaque_id!(
    /// Request token inside a transaction, rendered as `r<n>`. Used as the
    /// key of bundle request and response entries.
    RequestId,
    "r"
);

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_async() -> bool {
    true
}

/// Request options as submitted by application code.
///
/// Field names on the wire follow the caller-facing option surface
/// (`type`, `async`, `tid`, `lowPriority`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    #[serde(rename = "type", default)]
    pub method: Method,
    /// Request body. A `Value::String` holds an already-serialized body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(rename = "async", default = "default_async")]
    pub asynchronous: bool,
    /// Set by the caller to join an open transaction explicitly.
    #[serde(rename = "tid", default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(rename = "lowPriority", default)]
    pub low_priority: bool,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            data: None,
            asynchronous: true,
            transaction_id: None,
            low_priority: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, data: Value) -> Self {
        Self::new(Method::Post, url).with_data(data)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn in_transaction(mut self, tid: TransactionId) -> Self {
        self.transaction_id = Some(tid);
        self
    }

    pub fn low_priority(mut self) -> Self {
        self.low_priority = true;
        self
    }

    /// Mark the request synchronous. Synchronous requests never wait in a transaction.
    pub fn blocking(mut self) -> Self {
        self.asynchronous = false;
        self
    }
}

/// Where a successful response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Bundle,
    Cache,
}

/// A successful response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub data: Value,
    pub source: ResponseSource,
}

impl Response {
    pub(crate) fn new(data: Value, source: ResponseSource) -> Self {
        Self { status: 200, status_text: "success".to_string(), data, source }
    }

    pub(crate) fn from_transport(response: TransportResponse, source: ResponseSource) -> Self {
        Self {
            status: response.status,
            status_text: response.status_text,
            data: response.body,
            source,
        }
    }
}

/// Sending half of a request's completion channel. Consumed on resolve, so a
/// request resolves at most once.
#[derive(Debug)]
pub(crate) struct Reply(oneshot::Sender<ProxyResult>);

impl Reply {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<ProxyResult>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub(crate) fn resolve(self, result: ProxyResult) {
        // The caller may have dropped its handle; that is not an error.
        let _ = self.0.send(result);
    }
}

/// What `RequestHandle::abort` acts on.
#[derive(Debug)]
pub(crate) enum AbortTarget {
    /// Still waiting inside an open transaction.
    Transaction {
        registry: Weak<TransactionRegistry>,
        transaction_id: TransactionId,
        request_id: RequestId,
    },
    /// Issued straight to the transport.
    InFlight(AbortHandle),
    /// Queued low-priority requests have no abort path.
    Detached,
}

/// Caller-side handle of a dispatched request.
#[derive(Debug)]
pub struct RequestHandle {
    rx: oneshot::Receiver<ProxyResult>,
    target: AbortTarget,
    aborted: AtomicBool,
}

impl RequestHandle {
    pub(crate) fn new(rx: oneshot::Receiver<ProxyResult>, target: AbortTarget) -> Self {
        Self { rx, target, aborted: AtomicBool::new(false) }
    }

    /// Transaction the request is waiting in, if any.
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match &self.target {
            AbortTarget::Transaction { transaction_id, .. } => Some(*transaction_id),
            _ => None,
        }
    }

    /// Id assigned inside the transaction, if the request joined one.
    pub fn request_id(&self) -> Option<RequestId> {
        match &self.target {
            AbortTarget::Transaction { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    /// Returns true if `abort` can have an effect for this request.
    pub fn is_abortable(&self) -> bool {
        !matches!(self.target, AbortTarget::Detached)
    }

    /// Abort the request. Returns true if something was actually cancelled.
    ///
    /// A request still pending in an open transaction is removed from it
    /// without any network effect. A request issued directly to the transport
    /// has its call cancelled, including a normal-priority call issued by the
    /// priority scheduler: its transport future is dropped and the caller
    /// observes `ProxyError::Aborted` instead of the call's result. Requests
    /// already handed to a bundle or queued as low priority are unaffected.
    pub fn abort(&self) -> bool {
        let cancelled = match &self.target {
            AbortTarget::Transaction { registry, transaction_id, request_id } => registry
                .upgrade()
                .map(|r| r.remove_request(*transaction_id, *request_id))
                .unwrap_or(false),
            AbortTarget::InFlight(handle) => {
                let outstanding = !handle.is_finished();
                handle.abort();
                outstanding
            }
            AbortTarget::Detached => false,
        };
        if cancelled {
            self.aborted.store(true, Ordering::Release);
        }
        cancelled
    }

    /// Non-blocking check for the outcome. Returns `None` while still pending.
    pub fn try_outcome(&mut self) -> Option<ProxyResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(self.closed_error())),
        }
    }

    /// Wait for the request to resolve.
    pub async fn outcome(self) -> ProxyResult {
        let aborted = self.aborted.load(Ordering::Acquire);
        match self.rx.await {
            Ok(result) => result,
            Err(_) if aborted => Err(ProxyError::Aborted),
            Err(_) => Err(ProxyError::Unresolved),
        }
    }

    fn closed_error(&self) -> ProxyError {
        if self.aborted.load(Ordering::Acquire) {
            ProxyError::Aborted
        } else {
            ProxyError::Unresolved
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_render_with_prefix_and_parse_back() {
        let tid = TransactionId::from_raw(7);
        let rid = RequestId::from_raw(42);
        assert_eq!(tid.to_string(), "t7");
        assert_eq!(rid.to_string(), "r42");
        assert_eq!("r42".parse::<RequestId>(), Ok(rid));
        assert!("t42".parse::<RequestId>().is_err());
        assert!("r".parse::<RequestId>().is_err());
    }

    #[test]
    fn request_options_deserialize_from_caller_surface() {
        let req: Request = serde_json::from_value(json!({
            "url": "/api/users/1",
            "type": "PUT",
            "data": "{\"name\":\"x\"}",
            "tid": "t3",
            "lowPriority": true
        }))
        .unwrap();

        assert_eq!(req.method, Method::Put);
        assert!(req.asynchronous);
        assert!(req.low_priority);
        assert_eq!(req.transaction_id, Some(TransactionId::from_raw(3)));
        assert_eq!(req.data, Some(json!("{\"name\":\"x\"}")));
    }

    #[test]
    fn request_defaults_to_async_get() {
        let req: Request = serde_json::from_value(json!({"url": "/a"})).unwrap();
        assert_eq!(req, Request::get("/a"));
    }

    #[test]
    fn reply_resolves_once() {
        let (reply, mut rx) = Reply::channel();
        reply.resolve(Ok(Response::new(json!(1), ResponseSource::Cache)));
        let got = rx.try_recv().unwrap().unwrap();
        assert_eq!(got.data, json!(1));
        assert_eq!(got.source, ResponseSource::Cache);
    }

    #[tokio::test]
    async fn dropped_reply_surfaces_unresolved() {
        let (reply, rx) = Reply::channel();
        let handle = RequestHandle::new(rx, AbortTarget::Detached);
        drop(reply);
        assert!(!handle.is_abortable());
        assert_eq!(handle.outcome().await, Err(ProxyError::Unresolved));
    }
}
