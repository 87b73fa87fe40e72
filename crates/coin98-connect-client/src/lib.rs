//! Client side of Coin98 Connect.
//!
//! A [`SessionController`] keeps one Socket.IO channel to the relay for the
//! handshake and for wallet results, and hands every request to a
//! [`Transport`] that gets it to the wallet (page navigation, OS deep link,
//! or a host callback).

mod config;
mod controller;
mod relay;
mod signer;
pub mod socketio;
mod transport;

pub use config::{ClientConfig, ConfigError, Variant};
pub use controller::{
    ClientEvent, ConnectOptions, ConnectResult, Session, SessionController,
    SessionControllerBuilder,
};
pub use relay::{CONNECT_EVENT, RESULT_EVENT, Relay, RelayEvent, RelayEvents, SocketRelay};
pub use signer::{AccountData, OfflineSigner, OfflineSignerOnlyAmino};
pub use transport::{
    HostCallbackTransport, LinkOpener, NativeLinkTransport, RelaySocketTransport, Transport,
};

pub use coin98_connect_core as core;
