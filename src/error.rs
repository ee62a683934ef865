//! Error types for the request coordination proxy.
//!
//! Every error is local to the request(s) it affects and is delivered
//! through that request's own completion channel. Nothing here is fatal
//! to the process and nothing is retried.

use thiserror::Error;

use crate::request::TransactionId;
use crate::transport::TransportError;

/// Errors a dispatched request can resolve with.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProxyError {
    /// The underlying wire call failed or returned a non-2xx status.
    /// For a bundle, every member receives a copy.
    #[error("Transport error {status} ({status_text}): {message}")]
    Transport {
        status: u16,
        status_text: String,
        message: String,
    },

    /// The bundle response body could not be decoded. Propagated like a
    /// transport error, to every member of the bundle.
    #[error("Bundle response could not be decoded (status {status}): {message}")]
    Parse { status: u16, message: String },

    /// One entry inside an otherwise successful bundle response is marked failed.
    #[error("Bundled request failed: {status_text}")]
    ItemFailed {
        code: Option<u16>,
        status_text: String,
        payload: serde_json::Value,
    },

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TransactionId),

    /// The caller aborted the request before a result was delivered.
    #[error("Request aborted")]
    Aborted,

    /// The proxy let go of the request without ever resolving it, e.g. its id
    /// never appeared in the bundle response or its transaction was aborted.
    #[error("Request was never resolved")]
    Unresolved,
}

impl ProxyError {
    /// Returns true if the error came from the whole wire call rather than one item.
    pub fn is_transport_level(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Parse { .. })
    }

    /// Returns true if this error should be logged as a warning rather than an error.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::UnknownTransaction(_) | Self::Aborted | Self::Unresolved
        )
    }

    /// HTTP-like status associated with the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } | Self::Parse { status, .. } => Some(*status),
            Self::ItemFailed { code, .. } => *code,
            _ => None,
        }
    }
}

impl From<TransportError> for ProxyError {
    fn from(err: TransportError) -> Self {
        Self::Transport {
            status: err.status,
            status_text: err.status_text,
            message: err.message,
        }
    }
}
