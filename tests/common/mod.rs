//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;

use relay_core::transport::Responder;
use relay_core::{Proxy, ProxyConfig, RecordingTransport, TransportError, TransportResponse, WireRequest};

pub const ENDPOINT: &str = "/api/multi-request";

pub fn config() -> ProxyConfig {
    ProxyConfig { bundle_endpoint: ENDPOINT.to_string(), ..ProxyConfig::default() }
}

/// Proxy over an echoing transport.
pub fn echo_proxy(config: ProxyConfig) -> (Proxy, Arc<RecordingTransport>) {
    with_transport(config, RecordingTransport::echo(ENDPOINT))
}

/// Proxy whose transport answers every call through `responder`.
pub fn responder_proxy<F>(config: ProxyConfig, responder: F) -> (Proxy, Arc<RecordingTransport>)
where
    F: Fn(&WireRequest) -> Result<TransportResponse, TransportError> + Send + Sync + 'static,
{
    let responder: Responder = Arc::new(responder);
    with_transport(config, RecordingTransport::new(responder))
}

/// Proxy whose bundle call always answers with `body`.
pub fn bundle_body_proxy(config: ProxyConfig, body: Value) -> (Proxy, Arc<RecordingTransport>) {
    responder_proxy(config, move |_| Ok(TransportResponse::ok(body.clone())))
}

pub fn with_transport(config: ProxyConfig, transport: RecordingTransport) -> (Proxy, Arc<RecordingTransport>) {
    let transport = Arc::new(transport);
    (Proxy::new(config, transport.clone()), transport)
}

pub fn urls(transport: &RecordingTransport) -> Vec<String> {
    transport.calls().into_iter().map(|c| c.url).collect()
}
