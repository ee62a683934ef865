//! Span utilities for wire calls issued by the proxy.

use tracing::{info_span, Span};

use crate::request::TransactionId;

/// Extension trait for adding outcome context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for standardized wire-call spans.
pub struct RequestSpan;

impl RequestSpan {
    /// Span for the wire call of a committed transaction.
    ///
    /// `status` and `error.message` are filled in by `SpanExt::record_result`.
    pub fn bundle(transaction_id: TransactionId, url: &str, members: usize) -> Span {
        info_span!(
            "bundle_call",
            transaction_id = %transaction_id,
            url = %url,
            members,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}
