// Copyright 2026 relay-core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Replay subcommand: push a recorded step sequence through a proxy backed by
//! an in-process transport and report the wire calls it produced.
//!
//! The input file is a JSON array. Each element is either a request in the
//! caller option format (`{"url": ..., "type": ..., "tid": ..., ...}`) or a
//! control step:
//!
//! ```json
//! [
//!   {"action": "begin"},
//!   {"url": "/api/users/1", "tid": "t1"},
//!   {"url": "/api/users/2", "tid": "t1"},
//!   {"action": "commit", "tid": "t1"},
//!   {"action": "wait", "ms": 200}
//! ]
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{self, ConfigError, ProxyConfig};
use crate::proxy::Proxy;
use crate::request::{Request, RequestHandle, ResponseSource, TransactionId};
use crate::telemetry::StatsSnapshot;
use crate::transport::{RecordingTransport, WireRequest};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Failed to read replay file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid replay file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayAction {
    Begin,
    Commit,
    Abort,
    Wait,
    Flush,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReplayStep {
    Control {
        action: ReplayAction,
        #[serde(default)]
        tid: Option<TransactionId>,
        #[serde(default)]
        ms: Option<u64>,
    },
    Request(Request),
}

/// How one replayed request resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayOutcome {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ResponseSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    pub calls: Vec<WireRequest>,
    pub outcomes: Vec<ReplayOutcome>,
    pub stats: StatsSnapshot,
}

pub fn parse_steps(source: &str) -> Result<Vec<ReplayStep>, ReplayError> {
    Ok(serde_json::from_str(source)?)
}

/// Run `steps` against a fresh proxy and collect what happened.
///
/// After the last step the replay waits out the longest chain of timers: a
/// dynamic window whose auto-commit is then deferred by the low-priority
/// delay. Requests still pending after that are reported as unresolved.
pub async fn run_replay(steps: Vec<ReplayStep>, config: ProxyConfig) -> ReplayReport {
    let transport = Arc::new(RecordingTransport::echo(config.bundle_endpoint.clone()));
    let settle = config.dynamic_window() + config.low_priority_flush_delay() + Duration::from_millis(1);
    let proxy = Proxy::new(config, transport.clone());
    let mut handles: Vec<(String, RequestHandle)> = Vec::new();

    for step in steps {
        match step {
            ReplayStep::Request(request) => {
                let url = request.url.clone();
                handles.push((url, proxy.dispatch(request)));
            }
            ReplayStep::Control { action, tid, ms } => match (action, tid) {
                (ReplayAction::Begin, _) => {
                    let tid = proxy.begin_transaction();
                    tracing::debug!(transaction_id = %tid, "replay opened transaction");
                }
                (ReplayAction::Commit, Some(tid)) => {
                    let _ = proxy.commit_transaction(tid);
                }
                (ReplayAction::Abort, Some(tid)) => {
                    let _ = proxy.abort_transaction(tid);
                }
                (ReplayAction::Commit | ReplayAction::Abort, None) => {
                    tracing::warn!(?action, "replay step without tid skipped");
                }
                (ReplayAction::Wait, _) => {
                    tokio::time::sleep(Duration::from_millis(ms.unwrap_or(0))).await;
                }
                (ReplayAction::Flush, _) => {
                    proxy.flush_low_priority();
                }
            },
        }
    }

    tokio::time::sleep(settle).await;
    // Let completion tasks of calls issued by the last timers run.
    tokio::task::yield_now().await;
    let stats = proxy.stats();
    proxy.reset();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (url, handle) in handles {
        let outcome = match handle.outcome().await {
            Ok(response) => ReplayOutcome { url, source: Some(response.source), error: None },
            Err(e) => ReplayOutcome { url, source: None, error: Some(e.to_string()) },
        };
        outcomes.push(outcome);
    }

    ReplayReport { calls: transport.calls(), outcomes, stats }
}

/// Entry point of `relay-core-cli replay <file>`. Returns the exit code.
pub async fn run_replay_file(path: &Path) -> Result<i32, ReplayError> {
    let source = std::fs::read_to_string(path).map_err(|source| ReplayError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let steps = parse_steps(&source)?;
    let config = config::load()?;
    let report = run_replay(steps, config).await;

    for call in &report.calls {
        println!("{}", serde_json::to_string(call)?);
    }
    for outcome in &report.outcomes {
        println!("{}", serde_json::to_string(outcome)?);
    }
    println!("{}", serde_json::to_string_pretty(&report.stats)?);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProxyConfig {
        ProxyConfig { bundle_endpoint: "/bundle".into(), ..ProxyConfig::default() }
    }

    #[test]
    fn steps_parse_requests_and_controls() {
        let steps = parse_steps(
            r#"[
                {"action": "begin"},
                {"url": "/a", "tid": "t1"},
                {"action": "commit", "tid": "t1"},
                {"action": "wait", "ms": 5},
                {"url": "/b", "type": "POST", "data": {"x": 1}, "lowPriority": true}
            ]"#,
        )
        .unwrap();

        assert_eq!(steps.len(), 5);
        assert!(matches!(steps[0], ReplayStep::Control { action: ReplayAction::Begin, .. }));
        match &steps[1] {
            ReplayStep::Request(r) => assert_eq!(r.transaction_id, Some(TransactionId::from_raw(1))),
            other => panic!("unexpected {other:?}"),
        }
        match &steps[4] {
            ReplayStep::Request(r) => assert!(r.low_priority),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(parse_steps(r#"[{"action": "explode"}]"#).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn replay_bundles_a_transaction() {
        let steps = parse_steps(
            r#"[
                {"action": "begin"},
                {"url": "/a", "tid": "t1"},
                {"url": "/b", "tid": "t1"},
                {"action": "commit", "tid": "t1"},
                {"url": "/c", "lowPriority": true}
            ]"#,
        )
        .unwrap();

        let report = run_replay(steps, config()).await;
        let urls: Vec<&str> = report.calls.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, ["/bundle", "/c"]);
        assert_eq!(report.stats.bundle_calls, 1);
        assert_eq!(report.stats.low_priority_flushed, 1);
        assert!(report.outcomes.iter().all(|o| o.error.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn replay_waits_for_deferred_dynamic_commit() {
        let cfg = ProxyConfig { dynamic_bundling_enabled: true, ..config() };
        let steps = parse_steps(r#"[{"url": "/a", "lowPriority": true}]"#).unwrap();

        let report = run_replay(steps, cfg).await;
        let urls: Vec<&str> = report.calls.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, ["/a"]);
        assert_eq!(report.outcomes[0].source, Some(ResponseSource::Network));
        assert_eq!(report.outcomes[0].error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn uncommitted_requests_report_unresolved() {
        let steps = parse_steps(r#"[{"action": "begin"}, {"url": "/a", "tid": "t1"}]"#).unwrap();
        let report = run_replay(steps, config()).await;
        assert!(report.calls.is_empty());
        assert_eq!(report.outcomes[0].error.as_deref(), Some("Request was never resolved"));
    }
}
