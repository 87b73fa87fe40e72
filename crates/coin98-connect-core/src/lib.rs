//! Core types for the Coin98 Connect protocol.
//!
//! This crate holds everything that does not touch the network: connection
//! identities, the closed method enumeration, the envelope codec, the
//! pending-call registry and session records. `coin98-connect-client` binds
//! these to a relay channel and a transport strategy.

pub mod codec;
mod error;
mod event;
mod identity;
pub mod method;
mod params;
mod registry;
mod session;

pub use codec::{DEFAULT_LINK_SCHEME, EncodedRequest, Envelope};
pub use error::ConnectError;
pub use event::{InboundEvent, WalletResponse, describe};
pub use identity::{
    ConnectionIdentity, CounterIdentity, DeviceIdentity, IdentityError, IdentityProvider,
    RandomIdentity,
};
pub use method::Method;
pub use params::{MessageBytes, Param, SerializableMessage};
pub use registry::{AbandonPolicy, CorrelationId, PendingCall, PendingCalls};
pub use session::{
    FileSessionStore, MemorySessionStore, SESSION_RECORD_NAME, SessionRecord, SessionStore,
};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; requests other than `connect` are refused.
    #[default]
    Disconnected,
    /// Handshake with the relay in progress.
    Connecting,
    /// Handshake verified and accepted by the wallet.
    Connected,
}
