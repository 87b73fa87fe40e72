//! Socket.IO v5 / Engine.IO v4 text framing.
//!
//! Only the default namespace and text packets are supported; that is all
//! the relay uses.
//!
//! ```text
//! 0{"sid":..}            engine open
//! 2 / 3                  ping / pong
//! 40                     socket connect
//! 42["event",..]         event
//! 4217["event",..]       event expecting ack 17
//! 4317[..]               ack 17
//! ```

use serde_json::Value;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Value),
    Close,
    Ping(String),
    Pong(String),
    Noop,
    Connect(Option<Value>),
    Disconnect,
    Event {
        ack: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("empty frame")]
    Empty,
    #[error("unsupported packet type {0:?}")]
    Unsupported(String),
    #[error("malformed packet: {0}")]
    Malformed(String),
}

impl Packet {
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Packet::Event {
            ack: None,
            name: name.into(),
            args,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Packet::Open(handshake) => format!("0{handshake}"),
            Packet::Close => "1".to_string(),
            Packet::Ping(data) => format!("2{data}"),
            Packet::Pong(data) => format!("3{data}"),
            Packet::Noop => "6".to_string(),
            Packet::Connect(None) => "40".to_string(),
            Packet::Connect(Some(auth)) => format!("40{auth}"),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { ack, name, args } => {
                let mut out = String::from("42");
                if let Some(id) = ack {
                    let _ = write!(out, "{id}");
                }
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                out.push_str(&Value::Array(items).to_string());
                out
            }
            Packet::Ack { id, args } => format!("43{id}{}", Value::Array(args.clone())),
            Packet::ConnectError(data) => format!("44{data}"),
        }
    }

    pub fn decode(frame: &str) -> Result<Self, PacketError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let rest = chars.as_str();
        match kind {
            '0' => Ok(Packet::Open(parse_json(rest)?)),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping(rest.to_string())),
            '3' => Ok(Packet::Pong(rest.to_string())),
            '6' => Ok(Packet::Noop),
            '4' => decode_socket(rest),
            _ => Err(PacketError::Unsupported(frame.chars().take(2).collect())),
        }
    }
}

fn decode_socket(packet: &str) -> Result<Packet, PacketError> {
    let mut chars = packet.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let body = strip_namespace(chars.as_str());
    match kind {
        '0' if body.is_empty() => Ok(Packet::Connect(None)),
        '0' => Ok(Packet::Connect(Some(parse_json(body)?))),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let (ack, json) = split_ack(body);
            let mut args = parse_array(json)?;
            if args.is_empty() {
                return Err(PacketError::Malformed("event without a name".into()));
            }
            let Value::String(name) = args.remove(0) else {
                return Err(PacketError::Malformed("event name is not a string".into()));
            };
            Ok(Packet::Event { ack, name, args })
        }
        '3' => {
            let (ack, json) = split_ack(body);
            let id = ack.ok_or_else(|| PacketError::Malformed("ack without an id".into()))?;
            Ok(Packet::Ack {
                id,
                args: parse_array(json)?,
            })
        }
        '4' => Ok(Packet::ConnectError(parse_json(body).unwrap_or(Value::Null))),
        other => Err(PacketError::Unsupported(format!("4{other}"))),
    }
}

/// Drop a `/namespace,` prefix.
fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        body.split_once(',').map_or("", |(_, rest)| rest)
    } else {
        body
    }
}

fn split_ack(body: &str) -> (Option<u64>, &str) {
    let digits = body.bytes().take_while(u8::is_ascii_digit).count();
    (body[..digits].parse().ok(), &body[digits..])
}

fn parse_json(text: &str) -> Result<Value, PacketError> {
    serde_json::from_str(text).map_err(|e| PacketError::Malformed(e.to_string()))
}

fn parse_array(text: &str) -> Result<Vec<Value>, PacketError> {
    match parse_json(text)? {
        Value::Array(items) => Ok(items),
        _ => Err(PacketError::Malformed("expected a JSON array".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_engine_packets() {
        assert_eq!(
            Packet::decode(r#"0{"sid":"abc","pingInterval":25000}"#).unwrap(),
            Packet::Open(json!({"sid": "abc", "pingInterval": 25000}))
        );
        assert_eq!(Packet::decode("2").unwrap(), Packet::Ping(String::new()));
        assert_eq!(Packet::decode("3abc").unwrap(), Packet::Pong("abc".into()));
        assert_eq!(Packet::decode("1").unwrap(), Packet::Close);
        assert_eq!(Packet::decode(""), Err(PacketError::Empty));
        assert!(matches!(Packet::decode("5"), Err(PacketError::Unsupported(_))));
    }

    #[test]
    fn decode_socket_packets() {
        assert_eq!(Packet::decode("40").unwrap(), Packet::Connect(None));
        assert_eq!(
            Packet::decode(r#"40{"sid":"s1"}"#).unwrap(),
            Packet::Connect(Some(json!({"sid": "s1"})))
        );
        assert_eq!(Packet::decode("41").unwrap(), Packet::Disconnect);
        assert_eq!(
            Packet::decode(r#"42["sdk_connect",{"data":{"id":"1"}}]"#).unwrap(),
            Packet::event("sdk_connect", vec![json!({"data": {"id": "1"}})])
        );
        assert_eq!(
            Packet::decode(r#"4317["conn?connect=t"]"#).unwrap(),
            Packet::Ack {
                id: 17,
                args: vec![json!("conn?connect=t")]
            }
        );
        assert_eq!(
            Packet::decode(r#"42/admin,5["x"]"#).unwrap(),
            Packet::Event {
                ack: Some(5),
                name: "x".into(),
                args: vec![]
            }
        );
    }

    #[test]
    fn rejects_bad_events() {
        assert!(Packet::decode("42[]").is_err());
        assert!(Packet::decode("42[1]").is_err());
        assert!(Packet::decode("43[true]").is_err());
        assert!(Packet::decode("42{}").is_err());
    }

    #[test]
    fn encode_packets() {
        assert_eq!(Packet::Connect(None).encode(), "40");
        assert_eq!(Packet::Pong(String::new()).encode(), "3");
        assert_eq!(
            Packet::Event {
                ack: Some(3),
                name: "coin98_connect".into(),
                args: vec![json!({"type": "verify_sdk"})]
            }
            .encode(),
            r#"423["coin98_connect",{"type":"verify_sdk"}]"#
        );
        assert_eq!(
            Packet::Ack {
                id: 3,
                args: vec![json!(true)]
            }
            .encode(),
            "433[true]"
        );
    }

    #[test]
    fn encoded_events_decode() {
        let packet = Packet::Event {
            ack: Some(99),
            name: "sdk_connect".into(),
            args: vec![json!({"id": "1"}), json!(2)],
        };
        assert_eq!(Packet::decode(&packet.encode()).unwrap(), packet);
    }
}
