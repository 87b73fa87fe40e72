//! Session controller.
//!
//! Binds an identity provider, the envelope codec, the pending-call registry,
//! the relay channel and one outbound transport into the public
//! connect / request / disconnect API.
//!
//! Lifecycle: `Disconnected -> Connecting -> Connected -> Disconnected`.
//! `Connecting` lasts until the relay has verified the handshake token and
//! the wallet has accepted the internal `connect` request. A relay drop at any
//! point returns the session to `Disconnected` and abandons pending calls.

use crate::config::{ClientConfig, Variant};
use crate::relay::{CONNECT_EVENT, Relay, RelayEvent, RelayEvents, SocketRelay};
use crate::signer::{OfflineSigner, OfflineSignerOnlyAmino};
use crate::transport::Transport;
use coin98_connect_core::{
    ConnectError, ConnectionIdentity, ConnectionState, CorrelationId, CounterIdentity, Envelope,
    IdentityProvider, MemorySessionStore, Method, Param, PendingCalls, RandomIdentity,
    SessionRecord, SessionStore, WalletResponse, codec,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, watch};

/// Options for [`SessionController::connect`].
///
/// Everything except `existing_id` is forwarded to the wallet as the param
/// of the handshake `connect` request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectOptions {
    /// Dapp name shown by the wallet. Required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "callbackURL", skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Resume a session under this identity without a new handshake.
    #[serde(skip)]
    pub existing_id: Option<ConnectionIdentity>,
}

impl ConnectOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Outcome of a successful connect.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectResult {
    pub identity: ConnectionIdentity,
    /// The wallet's answer to the handshake `connect` request; `None` when
    /// an existing session was resumed.
    pub response: Option<WalletResponse>,
}

/// Snapshot of the current session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub chain_namespace: Option<String>,
    pub identity: Option<ConnectionIdentity>,
    pub display_name: Option<String>,
    pub callback_target: Option<String>,
    pub connected: bool,
}

/// Local notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected { identity: ConnectionIdentity },
    Disconnected,
    /// An `sdk_connect` result arrived for an id nobody is waiting on.
    Unmatched { id: CorrelationId },
}

#[derive(Debug, Default)]
struct SessionState {
    session: Session,
    /// Identity of the last verified session; survives disconnects so the web
    /// variant can replay the handshake.
    remembered: Option<ConnectionIdentity>,
    should_reconnect: bool,
}

/// Handshake parameters, shared by explicit connects and replays.
struct Handshake {
    chain: String,
    name: String,
    callback: Option<String>,
    options: ConnectOptions,
    identity: Option<ConnectionIdentity>,
}

struct Inner {
    config: ClientConfig,
    variant: Variant,
    relay: Arc<dyn Relay>,
    transport: Option<Arc<dyn Transport>>,
    identities: Arc<dyn IdentityProvider>,
    store: Arc<dyn SessionStore>,
    pending: PendingCalls,
    state: Mutex<SessionState>,
    connecting: AtomicBool,
    /// Bumped whenever a relay channel is opened or deliberately closed; drop
    /// notices from older channels are ignored.
    generation: AtomicU64,
    status: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
}

/// Public request/response API over one wallet session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

pub struct SessionControllerBuilder {
    config: ClientConfig,
    relay: Option<Arc<dyn Relay>>,
    transport: Option<Arc<dyn Transport>>,
    identities: Option<Arc<dyn IdentityProvider>>,
    store: Option<Arc<dyn SessionStore>>,
}

impl SessionControllerBuilder {
    pub fn relay(mut self, relay: impl Relay + 'static) -> Self {
        self.relay = Some(Arc::new(relay));
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn identity_provider(mut self, provider: impl IdentityProvider + 'static) -> Self {
        self.identities = Some(Arc::new(provider));
        self
    }

    pub fn session_store(mut self, store: impl SessionStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Build the controller. Without an explicit relay a [`SocketRelay`] is
    /// created from the config; without a transport every connect and
    /// request fails with `NotInitialized`.
    pub fn build(self) -> Result<SessionController, ConnectError> {
        let relay: Arc<dyn Relay> = match self.relay {
            Some(relay) => relay,
            None => Arc::new(SocketRelay::new(&self.config)?),
        };
        let variant = self
            .transport
            .as_ref()
            .map_or(self.config.variant, |t| t.variant());
        if variant != self.config.variant {
            tracing::debug!(
                ?variant,
                configured = ?self.config.variant,
                "transport overrides configured variant"
            );
        }
        let identities = self.identities.unwrap_or_else(|| match variant {
            Variant::Lite => Arc::new(CounterIdentity::new()),
            Variant::Web | Variant::Native => Arc::new(RandomIdentity),
        });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()));
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(64);

        Ok(SessionController {
            inner: Arc::new(Inner {
                pending: PendingCalls::new(self.config.on_disconnect),
                config: self.config,
                variant,
                relay,
                transport: self.transport,
                identities,
                store,
                state: Mutex::new(SessionState::default()),
                connecting: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                status,
                events,
            }),
        })
    }
}

/// Held for the duration of one handshake.
struct ConnectGuard<'a>(&'a AtomicBool);

impl<'a> ConnectGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ConnectError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| ConnectError::ConnectInProgress)
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SessionController {
    pub fn builder(config: ClientConfig) -> SessionControllerBuilder {
        SessionControllerBuilder {
            config,
            relay: None,
            transport: None,
            identities: None,
            store: None,
        }
    }

    pub fn variant(&self) -> Variant {
        self.inner.variant
    }

    pub fn session(&self) -> Session {
        self.inner.state().session.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state().session.connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.status.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Adopt a persisted session record as the remembered identity and
    /// chain. The session stays disconnected.
    pub fn restore(&self) -> Result<Option<SessionRecord>, ConnectError> {
        let Some(record) = self.inner.store.load()? else {
            return Ok(None);
        };
        let mut state = self.inner.state();
        state.session.identity = Some(record.id.clone());
        state.session.chain_namespace = Some(record.chain.clone());
        state.remembered = Some(record.id.clone());
        tracing::debug!(chain = %record.chain, "restored persisted session");
        Ok(Some(record))
    }

    /// Open a session for `chain`.
    pub async fn connect(
        &self,
        chain: &str,
        options: ConnectOptions,
    ) -> Result<ConnectResult, ConnectError> {
        if chain.is_empty() {
            return Err(ConnectError::InvalidChain);
        }
        self.inner.transport()?;
        let name = options
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or(ConnectError::MissingName)?;
        let callback = options
            .callback_url
            .clone()
            .or_else(|| self.inner.config.callback_url.clone());
        if self.inner.variant.requires_callback() && callback.is_none() {
            return Err(ConnectError::MissingCallback);
        }

        let _guard = ConnectGuard::acquire(&self.inner.connecting)?;
        if let Some(identity) = self.connected_identity() {
            tracing::debug!(%identity, "already connected");
            return Ok(ConnectResult {
                identity,
                response: None,
            });
        }
        self.handshake(Handshake {
            chain: chain.to_string(),
            name,
            callback,
            options,
            identity: None,
        })
        .await
    }

    /// Close the session. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let was_connected = {
            let mut state = self.inner.state();
            let was = state.session.connected;
            state.session.connected = false;
            state.session.identity = None;
            was
        };
        if let Err(e) = self.inner.store.clear() {
            tracing::warn!("failed to clear session record: {}", e);
        }
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.relay.close().await;
        self.inner.abandon_pending().await;
        self.inner.status.send_replace(ConnectionState::Disconnected);
        if was_connected {
            tracing::info!("session disconnected");
            let _ = self.inner.events.send(ClientEvent::Disconnected);
        }
    }

    /// Send `method` to the wallet and wait for the correlated result.
    pub async fn request(
        &self,
        method: Method,
        params: Vec<Param>,
    ) -> Result<WalletResponse, ConnectError> {
        self.reconnect_if_eligible().await?;
        if !self.is_connected() && !method.is_connect() {
            return Err(ConnectError::NotConnected);
        }
        self.dispatch(method, params).await
    }

    /// [`request`](Self::request) by wire method name.
    pub async fn request_named(
        &self,
        method: &str,
        params: Vec<Param>,
    ) -> Result<WalletResponse, ConnectError> {
        self.request(method.parse()?, params).await
    }

    pub fn get_offline_signer(&self, chain_id: impl Into<String>) -> OfflineSigner {
        OfflineSigner::new(chain_id, self.clone())
    }

    pub fn get_offline_signer_auto(&self, chain_id: impl Into<String>) -> OfflineSigner {
        OfflineSigner::new(chain_id, self.clone())
    }

    pub fn get_offline_signer_only_amino(
        &self,
        chain_id: impl Into<String>,
    ) -> OfflineSignerOnlyAmino {
        OfflineSignerOnlyAmino::new(chain_id, self.clone())
    }

    fn connected_identity(&self) -> Option<ConnectionIdentity> {
        let state = self.inner.state();
        state.session.connected.then(|| state.session.identity.clone()).flatten()
    }

    async fn handshake(&self, handshake: Handshake) -> Result<ConnectResult, ConnectError> {
        {
            let mut state = self.inner.state();
            state.session.chain_namespace = Some(handshake.chain.clone());
            state.session.display_name = Some(handshake.name.clone());
            state.session.callback_target = handshake.callback.clone();
        }

        if let Some(identity) = handshake.options.existing_id.clone() {
            self.ensure_open().await?;
            self.inner.mark_connected(&identity).await;
            tracing::info!(%identity, "resumed existing session");
            return Ok(ConnectResult {
                identity,
                response: None,
            });
        }

        self.inner.status.send_replace(ConnectionState::Connecting);
        let result = self.run_handshake(handshake).await;
        if let Err(e) = &result {
            tracing::warn!("connect failed: {}", e);
            let fallback = if self.is_connected() {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            };
            self.inner.status.send_replace(fallback);
        }
        result
    }

    async fn run_handshake(&self, handshake: Handshake) -> Result<ConnectResult, ConnectError> {
        let Handshake {
            chain,
            callback,
            options,
            identity,
            ..
        } = handshake;
        let identity = identity.unwrap_or_else(|| self.inner.identities.new_identity());

        self.ensure_open().await?;
        let origin = self.inner.connection_origin(callback.as_deref());
        let ack = self
            .inner
            .relay
            .emit(
                CONNECT_EVENT,
                json!({
                    "type": "connection_request",
                    "message": {"url": origin, "id": identity},
                }),
            )
            .await?;
        let connection = ack
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ConnectError::Codec("relay acknowledged without a connection string".into())
            })?
            .to_string();
        tracing::debug!("relay issued connection string");

        let token = verification_token(&connection);
        let verified = self
            .inner
            .relay
            .emit(
                CONNECT_EVENT,
                json!({
                    "type": "verify_sdk",
                    "message": {"token": token},
                }),
            )
            .await?;
        if !verified.first().and_then(Value::as_bool).unwrap_or(false) {
            return Err(ConnectError::SessionExpired);
        }

        let identity = ConnectionIdentity::new(connection)?;
        self.inner.state().session.identity = Some(identity.clone());

        let record = SessionRecord {
            id: identity.clone(),
            chain,
        };
        if let Err(e) = self.inner.store.save(&record) {
            tracing::warn!("failed to persist session record: {}", e);
        }

        let params = vec![Param::Json(serde_json::to_value(&options)?)];
        let response = self.dispatch(Method::Connect, params).await?;
        if let Some(reason) = response.rejection() {
            return Err(ConnectError::ConnectionRejected(reason));
        }

        self.inner.mark_connected(&identity).await;
        tracing::info!(%identity, "session connected");
        Ok(ConnectResult {
            identity,
            response: Some(response),
        })
    }

    /// Web sessions that dropped replay the handshake once, under the
    /// remembered identity and display name.
    async fn reconnect_if_eligible(&self) -> Result<(), ConnectError> {
        if !self.inner.variant.auto_reconnect() {
            return Ok(());
        }
        let replay = {
            let state = self.inner.state();
            if state.session.connected || !state.should_reconnect {
                None
            } else {
                match (&state.remembered, &state.session.chain_namespace) {
                    (Some(identity), Some(chain)) => Some(Handshake {
                        chain: chain.clone(),
                        name: state.session.display_name.clone().unwrap_or_default(),
                        callback: state.session.callback_target.clone(),
                        options: ConnectOptions {
                            name: state.session.display_name.clone(),
                            callback_url: state.session.callback_target.clone(),
                            ..ConnectOptions::default()
                        },
                        identity: Some(identity.clone()),
                    }),
                    _ => None,
                }
            }
        };
        let Some(replay) = replay else {
            return Ok(());
        };

        tracing::info!(chain = %replay.chain, "session lost, reconnecting before request");
        let _guard = ConnectGuard::acquire(&self.inner.connecting)?;
        self.handshake(replay).await.map(|_| ())
    }

    async fn dispatch(
        &self,
        method: Method,
        params: Vec<Param>,
    ) -> Result<WalletResponse, ConnectError> {
        let transport = self.inner.transport()?;
        let (identity, chain, callback) = {
            let state = self.inner.state();
            let identity = state.session.identity.clone().ok_or(ConnectError::NotConnected)?;
            (
                identity,
                state.session.chain_namespace.clone().unwrap_or_default(),
                state.session.callback_target.clone(),
            )
        };

        let id = CorrelationId::next();
        let params = codec::transform_params(method, params)?;
        let page = self.inner.config.page_url.as_deref();
        let envelope = Envelope {
            method,
            params,
            id: id.clone(),
            chain,
            redirect: codec::redirect_target(callback.as_deref(), page),
        };
        let encoded = codec::encode(&identity, envelope, &self.inner.config.link_scheme)?;

        let waiter = self.inner.pending.register(id.clone()).await;
        let sent = match self.ensure_open().await {
            Ok(()) => transport.deliver(&encoded),
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            self.inner.pending.forget(&id).await;
            return Err(e);
        }
        tracing::debug!(%method, %id, "request dispatched");
        waiter.wait().await
    }

    /// Open the relay channel if needed and start pumping its events.
    async fn ensure_open(&self) -> Result<(), ConnectError> {
        if let Some(events) = self.inner.relay.open().await? {
            let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
            tokio::spawn(pump(Arc::downgrade(&self.inner), generation, events));
        }
        Ok(())
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> Result<Arc<dyn Transport>, ConnectError> {
        self.transport
            .clone()
            .ok_or_else(|| ConnectError::NotInitialized("no transport strategy configured".into()))
    }

    fn connection_origin(&self, callback: Option<&str>) -> Option<String> {
        match self.variant {
            Variant::Web => self.config.page_origin(),
            Variant::Native | Variant::Lite => callback.map(str::to_string),
        }
    }

    async fn mark_connected(&self, identity: &ConnectionIdentity) {
        {
            let mut state = self.state();
            state.session.identity = Some(identity.clone());
            state.session.connected = true;
            state.remembered = Some(identity.clone());
            state.should_reconnect = self.variant.auto_reconnect();
        }
        self.status.send_replace(ConnectionState::Connected);
        let released = self.pending.release_detached().await;
        if released > 0 {
            tracing::debug!(released, "failed calls parked by an earlier session");
        }
        let _ = self.events.send(ClientEvent::Connected {
            identity: identity.clone(),
        });
    }

    async fn abandon_pending(&self) {
        let abandoned = self.pending.abandon_all().await;
        if abandoned > 0 {
            tracing::warn!(abandoned, policy = ?self.pending.policy(), "abandoned pending calls");
        }
    }

    async fn handle_drop(&self) {
        let was_connected = {
            let mut state = self.state();
            std::mem::replace(&mut state.session.connected, false)
        };
        self.status.send_replace(ConnectionState::Disconnected);
        self.abandon_pending().await;
        if was_connected {
            tracing::warn!("relay dropped the session");
            let _ = self.events.send(ClientEvent::Disconnected);
        }
    }
}

async fn pump(inner: Weak<Inner>, generation: u64, mut events: RelayEvents) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            RelayEvent::Result(event) => {
                if inner.pending.resolve(&event.id, event.response).await {
                    tracing::debug!(id = %event.id, "request resolved");
                } else {
                    tracing::debug!(id = %event.id, "no pending call for result");
                    let _ = inner.events.send(ClientEvent::Unmatched { id: event.id });
                }
            }
            RelayEvent::Disconnected if inner.generation.load(Ordering::Acquire) == generation => {
                inner.handle_drop().await
            }
            RelayEvent::Disconnected => {
                tracing::debug!(generation, "ignoring drop of a retired channel")
            }
        }
    }
}

/// The `connect` query parameter of the relay's connection string.
fn verification_token(connection: &str) -> Option<String> {
    let query = connection.split('?').nth(1)?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "connect")
        .map(|(_, value)| value.into_owned())
}
