//! Request parameters.
//!
//! Params are mostly plain JSON, but chain libraries hand over transactions
//! that only expose a serialized message, and raw byte buffers. The codec
//! turns those into base58 strings for the methods that expect them.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// An object that can serialize its signable message, such as a Solana
/// transaction.
pub trait SerializableMessage: fmt::Debug + Send + Sync {
    fn serialize_message(&self) -> Vec<u8>;
}

/// A message the caller has already serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBytes(pub Vec<u8>);

impl SerializableMessage for MessageBytes {
    fn serialize_message(&self) -> Vec<u8> {
        self.0.clone()
    }
}

/// One positional request parameter.
#[derive(Debug, Clone)]
pub enum Param {
    Json(Value),
    Bytes(Vec<u8>),
    Message(Arc<dyn SerializableMessage>),
    List(Vec<Param>),
}

impl Param {
    pub fn message(message: impl SerializableMessage + 'static) -> Self {
        Param::Message(Arc::new(message))
    }

    /// Strings and ordered sequences; `sol_sign` calls these "message".
    pub(crate) fn is_message_like(&self) -> bool {
        matches!(
            self,
            Param::Json(Value::String(_)) | Param::Json(Value::Array(_)) | Param::List(_)
        )
    }

    /// JSON form of the param. Bytes become arrays of numbers; messages that
    /// were not consumed by a transform travel as base58.
    pub fn into_json(self) -> Value {
        match self {
            Param::Json(value) => value,
            Param::Bytes(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
            Param::Message(message) => Value::String(base58(&message.serialize_message())),
            Param::List(items) => Value::Array(items.into_iter().map(Param::into_json).collect()),
        }
    }
}

pub(crate) fn base58(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Param::Json(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Json(Value::String(value.to_string()))
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Json(Value::String(value))
    }
}

impl From<Vec<u8>> for Param {
    fn from(bytes: Vec<u8>) -> Self {
        Param::Bytes(bytes)
    }
}

impl From<Vec<Param>> for Param {
    fn from(items: Vec<Param>) -> Self {
        Param::List(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_forms() {
        assert_eq!(Param::from("a").into_json(), json!("a"));
        assert_eq!(Param::from(vec![1u8, 2]).into_json(), json!([1, 2]));
        assert_eq!(
            Param::message(MessageBytes(b"hello".to_vec())).into_json(),
            json!("Cn8eVZg")
        );
        assert_eq!(
            Param::List(vec![Param::from("x"), Param::Json(Value::Null)]).into_json(),
            json!(["x", null])
        );
    }

    #[test]
    fn message_like() {
        assert!(Param::from("tx").is_message_like());
        assert!(Param::Json(json!([1, 2])).is_message_like());
        assert!(Param::List(vec![]).is_message_like());
        assert!(!Param::Json(json!({"a": 1})).is_message_like());
        assert!(!Param::message(MessageBytes(vec![1])).is_message_like());
        assert!(!Param::Bytes(vec![1]).is_message_like());
    }
}
