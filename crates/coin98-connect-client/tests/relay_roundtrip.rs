//! Drives the client against an in-process Socket.IO relay over a real
//! localhost websocket.

use coin98_connect_client::socketio::Packet;
use coin98_connect_client::{
    CONNECT_EVENT, ClientConfig, ConnectOptions, HostCallbackTransport, Relay, RelayEvent,
    SessionController, SocketRelay, Variant,
};
use coin98_connect_core::{ConnectError, ConnectionState, CorrelationId, DEFAULT_LINK_SCHEME, codec};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;

const CONNECTION: &str = "relay-conn?connect=tok";

/// `Some(payload)` is pushed to the client as `sdk_connect`; `None` makes the
/// relay hang up.
type WalletInbox = mpsc::UnboundedReceiver<Option<Value>>;

struct FakeRelay {
    addr: SocketAddr,
    pongs: Arc<AtomicUsize>,
    wallet: mpsc::UnboundedSender<Option<Value>>,
}

impl FakeRelay {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (wallet, inbox) = mpsc::unbounded_channel();
        let inbox = Arc::new(Mutex::new(inbox));
        let pongs = Arc::new(AtomicUsize::new(0));

        let seen = pongs.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let inbox = inbox.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let mut inbox = inbox.lock().await;
                    serve(stream, &mut inbox, &seen).await;
                });
            }
        });

        Self { addr, pongs, wallet }
    }

    fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(format!("ws://{}", self.addr));
        config.variant = Variant::Lite;
        config.callback_url = Some("host://coin98".into());
        config.connect_timeout_ms = 5_000;
        config
    }
}

async fn serve(stream: TcpStream, inbox: &mut WalletInbox, pongs: &AtomicUsize) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();
    let open = Packet::Open(json!({
        "sid": "fake",
        "upgrades": [],
        "pingInterval": 25000,
        "pingTimeout": 20000,
    }));
    if sink.send(text(&open)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = stream.next() => {
                let Some(Ok(msg)) = msg else { return };
                let Message::Text(frame) = msg else { continue };
                let reply = match Packet::decode(&frame) {
                    Ok(Packet::Connect(_)) => {
                        let _ = sink.send(text(&Packet::Connect(Some(json!({"sid": "s1"}))))).await;
                        Some(Packet::Ping(String::new()))
                    }
                    Ok(Packet::Pong(_)) => {
                        pongs.fetch_add(1, Ordering::SeqCst);
                        None
                    }
                    Ok(Packet::Event { ack: Some(id), name, args }) if name == CONNECT_EVENT => {
                        let answer = match args[0]["type"].as_str() {
                            Some("connection_request") => json!(CONNECTION),
                            Some("verify_sdk") => json!(args[0]["message"]["token"] == "tok"),
                            _ => Value::Null,
                        };
                        Some(Packet::Ack { id, args: vec![answer] })
                    }
                    Ok(Packet::Disconnect) => return,
                    _ => None,
                };
                if let Some(reply) = reply {
                    if sink.send(text(&reply)).await.is_err() {
                        return;
                    }
                }
            }
            answer = inbox.recv() => match answer {
                Some(Some(payload)) => {
                    let _ = sink.send(text(&Packet::event("sdk_connect", vec![payload]))).await;
                }
                _ => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
        }
    }
}

fn text(packet: &Packet) -> Message {
    Message::Text(packet.encode().into())
}

/// A wallet that accepts the handshake, answers `eth_accounts`, and makes the
/// relay hang up on `eth_sign`.
fn wallet(relay: &FakeRelay) -> HostCallbackTransport {
    let wallet = relay.wallet.clone();
    HostCallbackTransport::new(move |link| {
        let (_, envelope) = codec::decode_deep_link(DEFAULT_LINK_SCHEME, link).unwrap();
        let answer = match envelope.method.as_str() {
            "connect" => Some(json!({"data": {"id": envelope.id, "result": true}})),
            "eth_sign" => None,
            _ => Some(json!({"data": {"id": envelope.id, "result": ["0xabc"]}})),
        };
        wallet.send(answer).unwrap();
    })
}

async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut).await.unwrap()
}

#[tokio::test]
async fn socket_relay_acks_and_events() {
    let fake = FakeRelay::spawn().await;
    let relay = SocketRelay::new(&fake.config()).unwrap();

    let mut events = within(relay.open()).await.unwrap().unwrap();
    assert!(relay.is_open());
    assert!(within(relay.open()).await.unwrap().is_none());

    let ack = within(relay.emit(
        CONNECT_EVENT,
        json!({"type": "connection_request", "message": {"url": null, "id": "abc"}}),
    ))
    .await
    .unwrap();
    assert_eq!(ack, vec![json!(CONNECTION)]);

    let verify = json!({"type": "verify_sdk", "message": {"token": "tok"}});
    let ack = within(relay.emit(CONNECT_EVENT, verify)).await.unwrap();
    assert_eq!(ack, vec![json!(true)]);

    fake.wallet
        .send(Some(json!({"data": {"id": 42, "result": "done"}})))
        .unwrap();
    match within(events.recv()).await.unwrap() {
        RelayEvent::Result(event) => {
            assert_eq!(event.id, CorrelationId::from("42"));
            assert_eq!(event.response.result, Some(json!("done")));
        }
        other => panic!("unexpected event {other:?}"),
    }

    within(async {
        while fake.pongs.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    relay.close().await;
    assert!(!relay.is_open());
    assert_eq!(
        relay.emit(CONNECT_EVENT, Value::Null).await,
        Err(ConnectError::Disconnected)
    );
}

#[tokio::test]
async fn connect_and_request_over_websocket() {
    let fake = FakeRelay::spawn().await;
    let client = SessionController::builder(fake.config())
        .transport(wallet(&fake))
        .build()
        .unwrap();

    let result = within(client.connect("ether", ConnectOptions::named("Roundtrip")))
        .await
        .unwrap();
    assert_eq!(result.identity.as_str(), CONNECTION);
    assert_eq!(client.state(), ConnectionState::Connected);

    let response = within(client.request_named("eth_accounts", vec![])).await.unwrap();
    assert_eq!(response.result, Some(json!(["0xabc"])));

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn relay_hangup_rejects_the_pending_request() {
    let fake = FakeRelay::spawn().await;
    let client = SessionController::builder(fake.config())
        .transport(wallet(&fake))
        .build()
        .unwrap();
    within(client.connect("ether", ConnectOptions::named("Roundtrip")))
        .await
        .unwrap();

    let params = vec![json!("0xabc").into(), json!("0x00").into()];
    let err = within(client.request_named("eth_sign", params))
        .await
        .unwrap_err();
    assert_eq!(err, ConnectError::Disconnected);
    assert!(!client.is_connected());
}
