//! Bundle wire protocol.
//!
//! Request: `{"requests": {"<rid>": {"url": ..., "type": ..., "data": ...}}}`.
//! Response: `{"responses": {"<rid>": <payload or {"status": "failed", ...}>}}`.
//! Legacy endpoints may deliver the response body as a JSON string.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::request::{Method, Request, RequestId};

/// Marker value of `status` on a failed bundle entry.
pub const FAILED_STATUS: &str = "failed";

/// One member of a bundle request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleItem {
    pub url: String,
    #[serde(rename = "type")]
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl BundleItem {
    pub fn from_request(request: &Request) -> Self {
        Self {
            url: request.url.clone(),
            method: request.method,
            data: request.data.clone().map(decode_body),
        }
    }
}

/// Body of the bundle call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BundleRequest {
    pub requests: BTreeMap<RequestId, BundleItem>,
}

impl BundleRequest {
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Parse an already-serialized body so it is not encoded twice inside the
/// bundle. A string that is not JSON is forwarded as-is.
pub fn decode_body(data: Value) -> Value {
    match data {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        other => other,
    }
}

/// Decode a bundle response body into its `responses` map.
///
/// A string body is parsed as JSON first. `Ok(None)` means the body decoded
/// but carries no `responses` object.
pub fn decode_bundle_response(body: Value) -> Result<Option<Map<String, Value>>, serde_json::Error> {
    let body = match body {
        Value::String(raw) => serde_json::from_str::<Value>(&raw)?,
        other => other,
    };
    match body {
        Value::Object(mut root) => match root.remove("responses") {
            Some(Value::Object(responses)) => Ok(Some(responses)),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

/// How a single bundle entry resolves.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Success(Value),
    Failed {
        code: Option<u16>,
        status_text: String,
        payload: Value,
    },
}

/// An entry fails only if it is an object whose `status` is `"failed"`.
pub fn classify_entry(entry: Value) -> EntryOutcome {
    let failed = entry
        .as_object()
        .and_then(|o| o.get("status"))
        .and_then(Value::as_str)
        == Some(FAILED_STATUS);
    if !failed {
        return EntryOutcome::Success(entry);
    }
    let code = entry
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok());
    EntryOutcome::Failed { code, status_text: FAILED_STATUS.to_string(), payload: entry }
}
