//! The relay channel.
//!
//! Every client variant keeps one Socket.IO connection to the relay: the
//! handshake runs over it as acknowledged `coin98_connect` emits, and wallet
//! results come back over it as `sdk_connect` events.

use crate::config::ClientConfig;
use crate::socketio::Packet;
use async_trait::async_trait;
use coin98_connect_core::{ConnectError, InboundEvent};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

/// Event the client emits for handshake steps.
pub const CONNECT_EVENT: &str = "coin98_connect";
/// Event the relay uses to deliver wallet results.
pub const RESULT_EVENT: &str = "sdk_connect";

/// Something that happened on the relay channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Result(InboundEvent),
    Disconnected,
}

pub type RelayEvents = mpsc::UnboundedReceiver<RelayEvent>;

/// A persistent, bidirectional channel to the relay.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Open the channel. Returns the event stream of the new connection, or
    /// `None` when the channel was already open.
    async fn open(&self) -> Result<Option<RelayEvents>, ConnectError>;

    /// Emit `event` with `payload` and wait for the relay's acknowledgement
    /// arguments.
    async fn emit(&self, event: &str, payload: Value) -> Result<Vec<Value>, ConnectError>;

    async fn close(&self);

    fn is_open(&self) -> bool;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type AckSlot = oneshot::Sender<Vec<Value>>;

/// Socket.IO relay over a websocket-only transport.
pub struct SocketRelay {
    url: Url,
    connect_timeout: Duration,
    channel: StdMutex<Option<Arc<Channel>>>,
    opening: Mutex<()>,
}

struct Channel {
    outgoing: mpsc::UnboundedSender<Message>,
    acks: StdMutex<HashMap<u64, AckSlot>>,
    next_ack: AtomicU64,
    open: AtomicBool,
}

impl SocketRelay {
    pub fn new(config: &ClientConfig) -> Result<Self, ConnectError> {
        let url = config
            .socket_url()
            .map_err(|e| ConnectError::NotInitialized(e.to_string()))?;
        Ok(Self {
            url,
            connect_timeout: config.connect_timeout(),
            channel: StdMutex::new(None),
            opening: Mutex::new(()),
        })
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Channel>>> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<Arc<Channel>> {
        self.slot().as_ref().filter(|c| c.is_open()).cloned()
    }
}

#[async_trait]
impl Relay for SocketRelay {
    async fn open(&self) -> Result<Option<RelayEvents>, ConnectError> {
        let _opening = self.opening.lock().await;
        if self.current().is_some() {
            return Ok(None);
        }

        tracing::debug!(url = %self.url, "opening relay channel");
        let ws = tokio::time::timeout(self.connect_timeout, handshake(&self.url))
            .await
            .map_err(|_| ConnectError::Transport("timed out connecting to the relay".into()))??;
        let (sink, stream) = ws.split();

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Channel {
            outgoing,
            acks: StdMutex::new(HashMap::new()),
            next_ack: AtomicU64::new(0),
            open: AtomicBool::new(true),
        });

        tokio::spawn(write_loop(sink, outgoing_rx));
        tokio::spawn(read_loop(stream, channel.clone(), events_tx));

        *self.slot() = Some(channel);
        tracing::info!(url = %self.url, "relay channel open");
        Ok(Some(events_rx))
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<Vec<Value>, ConnectError> {
        let channel = self.current().ok_or(ConnectError::Disconnected)?;
        let id = channel.next_ack.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        channel.await_ack(id, tx)?;

        let packet = Packet::Event {
            ack: Some(id),
            name: event.to_string(),
            args: vec![payload],
        };
        if channel.send(&packet).is_err() {
            channel.acks()?.remove(&id);
            return Err(ConnectError::Disconnected);
        }
        rx.await.map_err(|_| ConnectError::Disconnected)
    }

    async fn close(&self) {
        let Some(channel) = self.slot().take() else {
            return;
        };
        if channel.shut() {
            let _ = channel.send(&Packet::Disconnect);
            let _ = channel.outgoing.send(Message::Close(None));
            tracing::info!(url = %self.url, "relay channel closed");
        }
    }

    fn is_open(&self) -> bool {
        self.current().is_some()
    }
}

impl Channel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send(&self, packet: &Packet) -> Result<(), ConnectError> {
        self.outgoing
            .send(Message::Text(packet.encode().into()))
            .map_err(|_| ConnectError::Disconnected)
    }

    fn acks(&self) -> Result<MutexGuard<'_, HashMap<u64, AckSlot>>, ConnectError> {
        self.acks
            .lock()
            .map_err(|_| ConnectError::Transport("ack table lock poisoned".into()))
    }

    /// Park an ack waiter. `open` only flips under the ack lock, so a waiter
    /// is either refused here or dropped by [`shut`](Self::shut).
    fn await_ack(&self, id: u64, slot: AckSlot) -> Result<(), ConnectError> {
        let mut acks = self.acks()?;
        if !self.is_open() {
            return Err(ConnectError::Disconnected);
        }
        acks.insert(id, slot);
        Ok(())
    }

    /// Mark the channel closed and fail every parked ack waiter. Returns
    /// whether the channel was still open.
    fn shut(&self) -> bool {
        let mut acks = self.acks.lock().unwrap_or_else(PoisonError::into_inner);
        let was_open = self.open.swap(false, Ordering::AcqRel);
        acks.clear();
        was_open
    }
}

/// Websocket upgrade plus the Engine.IO open and Socket.IO connect exchange.
async fn handshake(url: &Url) -> Result<WsStream, ConnectError> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| ConnectError::Transport(e.to_string()))?;

    let mut connect_sent = false;
    loop {
        let msg = ws
            .next()
            .await
            .ok_or_else(|| ConnectError::Transport("relay closed during handshake".into()))?
            .map_err(|e| ConnectError::Transport(e.to_string()))?;
        let Message::Text(text) = msg else {
            continue;
        };
        match Packet::decode(&text) {
            Ok(Packet::Open(_)) if !connect_sent => {
                ws.send(Message::Text(Packet::Connect(None).encode().into()))
                    .await
                    .map_err(|e| ConnectError::Transport(e.to_string()))?;
                connect_sent = true;
            }
            Ok(Packet::Ping(data)) => {
                ws.send(Message::Text(Packet::Pong(data).encode().into()))
                    .await
                    .map_err(|e| ConnectError::Transport(e.to_string()))?;
            }
            Ok(Packet::Connect(_)) if connect_sent => return Ok(ws),
            Ok(Packet::ConnectError(reason)) => {
                return Err(ConnectError::Transport(format!("relay refused connection: {reason}")));
            }
            Ok(other) => tracing::debug!(?other, "ignoring packet during handshake"),
            Err(e) => return Err(ConnectError::Transport(e.to_string())),
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = outgoing.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            tracing::debug!("relay write failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    channel: Arc<Channel>,
    events: mpsc::UnboundedSender<RelayEvent>,
) {
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("relay read failed: {}", e);
                break;
            }
        };
        let packet = match Packet::decode(&text) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("invalid relay packet: {}", e);
                continue;
            }
        };
        match packet {
            Packet::Ping(data) => {
                let _ = channel.send(&Packet::Pong(data));
            }
            Packet::Event { name, mut args, .. } if name == RESULT_EVENT => {
                let payload = if args.is_empty() { Value::Null } else { args.remove(0) };
                match InboundEvent::from_payload(payload) {
                    Ok(event) => {
                        let _ = events.send(RelayEvent::Result(event));
                    }
                    Err(e) => tracing::warn!("dropping {} event: {}", RESULT_EVENT, e),
                }
            }
            Packet::Event { name, .. } => tracing::debug!(%name, "ignoring relay event"),
            Packet::Ack { id, args } => {
                let slot = channel
                    .acks
                    .lock()
                    .ok()
                    .and_then(|mut acks| acks.remove(&id));
                match slot {
                    Some(slot) => {
                        let _ = slot.send(args);
                    }
                    None => tracing::debug!(id, "ack for unknown emit"),
                }
            }
            Packet::Disconnect | Packet::Close => break,
            Packet::Open(_)
            | Packet::Pong(_)
            | Packet::Noop
            | Packet::Connect(_)
            | Packet::ConnectError(_) => {}
        }
    }

    channel.shut();
    let _ = channel.outgoing.send(Message::Close(None));
    tracing::info!("relay channel dropped");
    let _ = events.send(RelayEvent::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (Arc<Channel>, mpsc::UnboundedReceiver<Message>) {
        let (outgoing, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Channel {
            outgoing,
            acks: StdMutex::new(HashMap::new()),
            next_ack: AtomicU64::new(0),
            open: AtomicBool::new(true),
        });
        (channel, rx)
    }

    #[tokio::test]
    async fn shutting_a_channel_fails_parked_acks() {
        let (channel, _outgoing) = channel();
        let (tx, rx) = oneshot::channel();
        channel.await_ack(1, tx).unwrap();

        assert!(channel.shut());
        assert!(rx.await.is_err());
        assert!(!channel.shut());
    }

    #[test]
    fn shut_channel_refuses_new_acks() {
        let (channel, _outgoing) = channel();
        channel.shut();
        let (tx, _rx) = oneshot::channel();
        assert_eq!(channel.await_ack(7, tx), Err(ConnectError::Disconnected));
        assert!(channel.acks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn emit_on_a_dropped_channel_returns_disconnected() {
        let relay = SocketRelay::new(&ClientConfig::new("ws://127.0.0.1:9")).unwrap();
        let (channel, _outgoing) = channel();
        *relay.slot() = Some(channel.clone());
        assert!(relay.is_open());

        channel.shut();
        assert_eq!(
            relay.emit(CONNECT_EVENT, Value::Null).await,
            Err(ConnectError::Disconnected)
        );
    }

    #[test]
    fn rejects_bad_relay_url() {
        let err = SocketRelay::new(&ClientConfig::new("nope")).err();
        assert!(matches!(err, Some(ConnectError::NotInitialized(_))));
    }

    #[tokio::test]
    async fn closed_channel_refuses_emits() {
        let relay = SocketRelay::new(&ClientConfig::new("ws://127.0.0.1:9")).unwrap();
        assert!(!relay.is_open());
        assert_eq!(
            relay.emit(CONNECT_EVENT, Value::Null).await,
            Err(ConnectError::Disconnected)
        );
        relay.close().await;
    }
}
