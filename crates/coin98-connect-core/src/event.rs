//! Inbound wallet results.

use crate::{ConnectError, CorrelationId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DEFAULT_REJECTION: &str = "Connection Rejected";

/// The wallet's answer to one request, as relayed in an `sdk_connect` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WalletResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn failed(error: Value) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Why a handshake `connect` response counts as a rejection: an `error`
    /// or `errors` field, or a missing/falsy `result`.
    pub fn rejection(&self) -> Option<String> {
        if let Some(err) = present(&self.error).or_else(|| present(&self.errors)) {
            return Some(describe(err));
        }
        if self.result.as_ref().is_none_or(is_falsy) {
            return Some(DEFAULT_REJECTION.to_string());
        }
        None
    }

    /// The JSON form handed back to callers that want the raw payload.
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn present(value: &Option<Value>) -> Option<&Value> {
    value.as_ref().filter(|v| !is_falsy(v))
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Human-readable text for an error value.
pub fn describe(err: &Value) -> String {
    match err {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_REJECTION.to_string()),
        _ => DEFAULT_REJECTION.to_string(),
    }
}

/// A correlated result, routed to exactly one pending call.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub id: CorrelationId,
    pub response: WalletResponse,
}

impl InboundEvent {
    /// Parse the first argument of an `sdk_connect` event.
    ///
    /// The relay wraps the wallet answer as `{data: {id, result, ...}}`; an
    /// `id` next to `data` is accepted when the answer itself has none.
    pub fn from_payload(payload: Value) -> Result<Self, ConnectError> {
        let Value::Object(mut outer) = payload else {
            return Err(ConnectError::Codec("sdk_connect payload is not an object".into()));
        };
        let data = outer.remove("data").unwrap_or(Value::Null);
        let id = data
            .get("id")
            .and_then(id_string)
            .or_else(|| outer.get("id").and_then(id_string))
            .ok_or_else(|| ConnectError::Codec("sdk_connect payload carries no id".into()))?;
        let response = match data {
            Value::Object(_) => serde_json::from_value(data)?,
            Value::Null => WalletResponse::default(),
            other => WalletResponse::ok(other),
        };
        Ok(Self {
            id: CorrelationId::from(id),
            response,
        })
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
