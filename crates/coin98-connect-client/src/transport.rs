//! Outbound transport strategies.
//!
//! All variants share the relay channel for the handshake and for inbound
//! results; they differ only in how an encoded request reaches the wallet.

use crate::config::Variant;
use coin98_connect_core::{ConnectError, EncodedRequest};
use std::sync::Arc;

/// Platform capability that opens a deep link (browser navigation, OS URL
/// handler, ...).
pub trait LinkOpener: Send + Sync {
    fn open_link(&self, url: &str) -> Result<(), ConnectError>;
}

impl<F> LinkOpener for F
where
    F: Fn(&str) -> Result<(), ConnectError> + Send + Sync,
{
    fn open_link(&self, url: &str) -> Result<(), ConnectError> {
        self(url)
    }
}

/// Delivers encoded requests to the wallet agent.
pub trait Transport: Send + Sync {
    fn variant(&self) -> Variant;

    /// Hand one request to the wallet. Called exactly once per request.
    fn deliver(&self, request: &EncodedRequest) -> Result<(), ConnectError>;
}

/// Web dapps: the page follows the deep link while the relay socket stays
/// open for the answer.
pub struct RelaySocketTransport {
    opener: Arc<dyn LinkOpener>,
}

impl RelaySocketTransport {
    pub fn new(opener: impl LinkOpener + 'static) -> Self {
        Self {
            opener: Arc::new(opener),
        }
    }
}

impl Transport for RelaySocketTransport {
    fn variant(&self) -> Variant {
        Variant::Web
    }

    fn deliver(&self, request: &EncodedRequest) -> Result<(), ConnectError> {
        self.opener.open_link(&request.deep_link)
    }
}

/// Native apps: the OS link opener launches the wallet.
pub struct NativeLinkTransport {
    opener: Arc<dyn LinkOpener>,
}

impl NativeLinkTransport {
    pub fn new(opener: impl LinkOpener + 'static) -> Self {
        Self {
            opener: Arc::new(opener),
        }
    }
}

impl Transport for NativeLinkTransport {
    fn variant(&self) -> Variant {
        Variant::Native
    }

    fn deliver(&self, request: &EncodedRequest) -> Result<(), ConnectError> {
        tracing::debug!(id = %request.envelope.id, "opening wallet link");
        self.opener.open_link(&request.deep_link)
    }
}

type HostCallback = dyn Fn(&str) + Send + Sync;

/// The host application presents the link itself, e.g. inside an embedded
/// webview.
pub struct HostCallbackTransport {
    callback: Arc<HostCallback>,
}

impl HostCallbackTransport {
    pub fn new(callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }
}

impl Transport for HostCallbackTransport {
    fn variant(&self) -> Variant {
        Variant::Lite
    }

    fn deliver(&self, request: &EncodedRequest) -> Result<(), ConnectError> {
        (self.callback)(&request.deep_link);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coin98_connect_core::{ConnectionIdentity, CorrelationId, Envelope, Method, codec};
    use std::sync::Mutex;

    fn request() -> EncodedRequest {
        let envelope = Envelope {
            method: Method::Connect,
            params: vec![],
            id: CorrelationId::from("1"),
            chain: "ether".into(),
            redirect: String::new(),
        };
        let identity = ConnectionIdentity::new("abc").unwrap();
        codec::encode(&identity, envelope, "coin98://").unwrap()
    }

    #[test]
    fn link_transports_open_the_deep_link() {
        let opened = Arc::new(Mutex::new(Vec::new()));
        let sink = opened.clone();
        let transport = NativeLinkTransport::new(move |url: &str| -> Result<(), ConnectError> {
            sink.lock().unwrap().push(url.to_string());
            Ok(())
        });
        let req = request();
        transport.deliver(&req).unwrap();
        assert_eq!(*opened.lock().unwrap(), vec![req.deep_link.clone()]);
        assert_eq!(transport.variant(), Variant::Native);
    }

    #[test]
    fn opener_failures_propagate() {
        let transport = RelaySocketTransport::new(|_: &str| -> Result<(), ConnectError> {
            Err(ConnectError::Link("no browser".into()))
        });
        assert_eq!(transport.deliver(&request()), Err(ConnectError::Link("no browser".into())));
    }

    #[test]
    fn host_callback_receives_link() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let transport = HostCallbackTransport::new(move |url| {
            *sink.lock().unwrap() = Some(url.to_string());
        });
        transport.deliver(&request()).unwrap();
        let link = seen.lock().unwrap().clone().unwrap();
        assert!(link.starts_with("coin98://abc%26request%3D"));
        assert_eq!(transport.variant(), Variant::Lite);
    }
}
