//! Envelope codec.
//!
//! A request leaves the client as
//!
//! ```text
//! <identity>&request=<encodeURIComponent(JSON envelope)>
//! ```
//!
//! and deep links wrap that whole string in a second `encodeURIComponent`
//! pass behind the `coin98://` scheme. The relay decodes exactly this shape,
//! so both passes and the guarded prefix check are kept as they are.

use crate::method::{CosmosMethod, SolanaMethod};
use crate::params::base58;
use crate::{ConnectError, ConnectionIdentity, CorrelationId, Method, Param};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Deep link scheme prefix.
pub const DEFAULT_LINK_SCHEME: &str = "coin98://";

const REQUEST_MARKER: &str = "&request=";

/// Characters `encodeURIComponent` leaves alone besides ASCII alphanumerics.
const COMPONENT_SAFE: &str = "-_.!~*'()";
/// Characters `encodeURI` leaves alone besides ASCII alphanumerics.
const URI_SAFE: &str = "-_.!~*'();,/?:@&=+$#";

/// The transport-ready form of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub method: Method,
    pub params: Vec<Value>,
    pub id: CorrelationId,
    pub chain: String,
    pub redirect: String,
}

/// An envelope with both of its encoded forms.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRequest {
    pub envelope: Envelope,
    /// `<identity>&request=<pct JSON>`
    pub wire: String,
    /// `coin98://<pct wire>`
    pub deep_link: String,
}

/// Apply the per-method param rewrites and lower params to JSON.
pub fn transform_params(
    method: Method,
    mut params: Vec<Param>,
) -> Result<Vec<Value>, ConnectError> {
    match method {
        Method::Solana(m) => transform_solana(m, &mut params)
            .map_err(|reason| ConnectError::malformed(method.as_str(), reason))?,
        Method::Cosmos(m) => {
            let mut values: Vec<Value> = params.into_iter().map(Param::into_json).collect();
            transform_cosmos(m, &mut values)
                .map_err(|reason| ConnectError::malformed(method.as_str(), reason))?;
            return Ok(values);
        }
        Method::Connect | Method::Evm(_) | Method::Near(_) | Method::Terra(_) => {}
    }
    Ok(params.into_iter().map(Param::into_json).collect())
}

fn transform_solana(method: SolanaMethod, params: &mut Vec<Param>) -> Result<(), String> {
    match method {
        SolanaMethod::Sign => {
            let first = params
                .first_mut()
                .ok_or("expected a message or transaction as the first param")?;
            let kind = if first.is_message_like() {
                "message"
            } else {
                "transaction"
            };
            let serialized = match first {
                Param::Message(message) => Some(base58(&message.serialize_message())),
                _ => None,
            };
            if let Some(serialized) = serialized {
                *first = Param::from(serialized);
            }
            let kind = Param::from(kind);
            match params.get_mut(1) {
                Some(slot) => *slot = kind,
                None => params.push(kind),
            }
        }
        SolanaMethod::SignAllTransactions => {
            let Some(first) = params.first_mut() else {
                return Ok(());
            };
            let items = match std::mem::replace(first, Param::Json(Value::Null)) {
                Param::List(items) => items,
                Param::Json(Value::Array(items)) => items.into_iter().map(Param::Json).collect(),
                other => {
                    *first = other;
                    return Ok(());
                }
            };
            let encoded: Vec<Value> = items
                .into_iter()
                .filter_map(|item| match item {
                    Param::Message(message) => {
                        Some(Value::String(base58(&message.serialize_message())))
                    }
                    Param::Json(Value::Null) => None,
                    other => Some(other.into_json()),
                })
                .collect();
            let json = serde_json::to_string(&encoded).map_err(|e| e.to_string())?;
            *first = Param::from(json);
        }
        SolanaMethod::SignMessage => {
            let first = params
                .first_mut()
                .ok_or("expected a message as the first param")?;
            let bytes = match first {
                Param::Json(Value::String(text)) => text.as_bytes().to_vec(),
                Param::Bytes(bytes) => std::mem::take(bytes),
                Param::Json(Value::Array(items)) => byte_array(items)?,
                _ => return Err("message must be a string or a byte array".into()),
            };
            *first = Param::from(base58(&bytes));
        }
        SolanaMethod::Accounts
        | SolanaMethod::RequestAccounts
        | SolanaMethod::Verify
        | SolanaMethod::Transfer => {}
    }
    Ok(())
}

fn transform_cosmos(method: CosmosMethod, params: &mut [Value]) -> Result<(), String> {
    if method != CosmosMethod::SignDirect {
        return Ok(());
    }
    let doc = sign_doc_mut(params)
        .ok_or("expected a sign document with bodyBytes and authInfoBytes")?;
    for field in ["bodyBytes", "authInfoBytes"] {
        let encoded = match doc.get(field) {
            Some(Value::Array(items)) => base58(&byte_array(items)?),
            // already base58
            Some(Value::String(_)) => continue,
            Some(_) => return Err(format!("{field} must be a byte array")),
            None => return Err(format!("sign document has no {field}")),
        };
        doc.insert(field.to_string(), Value::String(encoded));
    }
    Ok(())
}

/// `params[0].signDoc`, or the bare sign document offline signers put in
/// `params[2]`.
fn sign_doc_mut(params: &mut [Value]) -> Option<&mut Map<String, Value>> {
    let nested = params
        .first()
        .and_then(|p| p.get("signDoc"))
        .is_some_and(Value::is_object);
    if nested {
        return params.first_mut()?.get_mut("signDoc")?.as_object_mut();
    }
    params
        .get_mut(2)?
        .as_object_mut()
        .filter(|doc| doc.contains_key("bodyBytes"))
}

fn byte_array(items: &[Value]) -> Result<Vec<u8>, String> {
    items
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| format!("{v} is not a byte"))
        })
        .collect()
}

/// The redirect target carried by every envelope: the registered callback,
/// else the current page, passed through `encodeURI`.
pub fn redirect_target(callback: Option<&str>, page: Option<&str>) -> String {
    callback
        .or(page)
        .map(|target| encode_keeping(target, URI_SAFE))
        .unwrap_or_default()
}

/// Encode an envelope for `identity` and build its deep link.
pub fn encode(
    identity: &ConnectionIdentity,
    envelope: Envelope,
    scheme: &str,
) -> Result<EncodedRequest, ConnectError> {
    let wire = encode_request(identity, &envelope)?;
    let deep_link = deep_link(scheme, &wire);
    Ok(EncodedRequest {
        envelope,
        wire,
        deep_link,
    })
}

/// `<identity>&request=<pct JSON>`
pub fn encode_request(
    identity: &ConnectionIdentity,
    envelope: &Envelope,
) -> Result<String, ConnectError> {
    let json = serde_json::to_string(envelope)?;
    Ok(format!("{identity}{REQUEST_MARKER}{}", encode_component(&json)))
}

/// Second encoding pass plus the scheme prefix, unless already prefixed.
pub fn deep_link(scheme: &str, wire: &str) -> String {
    let encoded = encode_component(wire);
    if encoded.starts_with(scheme) {
        encoded
    } else {
        format!("{scheme}{encoded}")
    }
}

/// Inverse of [`encode_request`].
pub fn decode_request(wire: &str) -> Result<(ConnectionIdentity, Envelope), ConnectError> {
    let (identity, request) = wire
        .rsplit_once(REQUEST_MARKER)
        .ok_or_else(|| ConnectError::Codec("missing request marker".into()))?;
    let json = urlencoding::decode(request).map_err(|e| ConnectError::Codec(e.to_string()))?;
    let envelope = serde_json::from_str(&json)?;
    Ok((ConnectionIdentity::new(identity)?, envelope))
}

/// Inverse of [`deep_link`] followed by [`decode_request`].
pub fn decode_deep_link(
    scheme: &str,
    link: &str,
) -> Result<(ConnectionIdentity, Envelope), ConnectError> {
    let encoded = link.strip_prefix(scheme).unwrap_or(link);
    let wire = urlencoding::decode(encoded).map_err(|e| ConnectError::Codec(e.to_string()))?;
    decode_request(&wire)
}

/// `encodeURIComponent`.
pub fn encode_component(input: &str) -> String {
    encode_keeping(input, COMPONENT_SAFE)
}

fn encode_keeping(input: &str, safe: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut buf = [0u8; 4];
    for c in input.chars() {
        if c.is_ascii_alphanumeric() || safe.contains(c) {
            out.push(c);
        } else {
            out.push_str(&urlencoding::encode(c.encode_utf8(&mut buf)));
        }
    }
    out
}
