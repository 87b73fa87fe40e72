//! Error taxonomy shared by the codec, the registry and the client.

use crate::identity::IdentityError;

/// Every failure a connect or request call can surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("unsupported chain: chain namespace cannot be empty")]
    InvalidChain,
    #[error("dapp name required")]
    MissingName,
    #[error("a callback URL is required for native clients")]
    MissingCallback,
    #[error("client has not been initialized: {0}")]
    NotInitialized(String),
    #[error("you need to connect before handling any request")]
    NotConnected,
    #[error("session is over: the relay rejected the connection token")]
    SessionExpired,
    #[error("connection rejected: {0}")]
    ConnectionRejected(String),
    #[error("malformed params for {method}: {reason}")]
    MalformedParams { method: String, reason: String },
    #[error("another connect call is still pending")]
    ConnectInProgress,
    #[error("disconnected before a result arrived")]
    Disconnected,
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("invalid connection identity: {0}")]
    InvalidIdentity(#[from] IdentityError),
    #[error("offline signer: {0}")]
    Signer(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("session storage error: {0}")]
    Storage(String),
    #[error("link delivery failed: {0}")]
    Link(String),
}

impl ConnectError {
    pub(crate) fn malformed(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedParams {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ConnectError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
