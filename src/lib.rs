//! Relay Core
//!
//! A request coordination proxy that sits between application code and an
//! HTTP transport. It groups requests into transactions, sends a committed
//! transaction as one bundled wire call, defers low-priority traffic behind a
//! quiet window and keeps a short-lived response cache.
//!
//! # Routing
//!
//! - **Transaction**: an asynchronous request tagged with an open transaction
//!   waits until the transaction is committed.
//! - **Dynamic**: with dynamic batching on, untagged asynchronous requests
//!   join an implicit transaction that commits itself after a short window.
//! - **Priority**: normal requests go out immediately; low-priority requests
//!   are flushed together once traffic goes quiet.
//! - **Direct**: everything else is handed to the transport as-is.
//!
//! The only I/O boundary is the [`transport::Transport`] trait.

pub mod cli;
pub mod config;
pub mod error;
pub mod proxy;
pub mod request;
pub mod telemetry;
pub mod transport;

pub use config::{ConfigError, ProxyConfig};
pub use error::ProxyError;
pub use proxy::Proxy;
pub use request::{Method, ProxyResult, Request, RequestHandle, RequestId, Response, ResponseSource, TransactionId};
pub use transport::{RecordingTransport, Transport, TransportError, TransportResponse, WireRequest};
