//! Client configuration.

use coin98_connect_core::{AbandonPolicy, DEFAULT_LINK_SCHEME};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Client flavour. Picks the identity source, reconnect policy and which
/// URL the relay is told about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Browser dapp: deep links opened by the page, implicit reconnect.
    #[default]
    Web,
    /// Native app: deep links opened by the OS, callback URL required.
    Native,
    /// Host-controlled delivery through a callback; callback URL required.
    Lite,
}

impl Variant {
    /// Whether `request()` replays a lost session before dispatching.
    pub fn auto_reconnect(self) -> bool {
        matches!(self, Variant::Web)
    }

    pub fn requires_callback(self) -> bool {
        matches!(self, Variant::Native | Variant::Lite)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the relay (`ws`, `wss`, `http` or `https`).
    pub relay_url: String,
    #[serde(default)]
    pub variant: Variant,
    /// Transport-level connect/idle timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Current page; redirect fallback and web connection origin.
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default = "default_link_scheme")]
    pub link_scheme: String,
    #[serde(default)]
    pub on_disconnect: AbandonPolicy,
}

fn default_connect_timeout_ms() -> u64 {
    600_000
}

fn default_link_scheme() -> String {
    DEFAULT_LINK_SCHEME.to_string()
}

impl ClientConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            variant: Variant::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            page_url: None,
            callback_url: None,
            link_scheme: default_link_scheme(),
            on_disconnect: AbandonPolicy::default(),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Websocket endpoint: `<relay>/socket.io/?EIO=4&transport=websocket`.
    pub fn socket_url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.relay_url)
            .map_err(|e| ConfigError::InvalidRelayUrl(format!("{}: {e}", self.relay_url)))?;
        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => {
                let reason = format!("unsupported scheme {other}");
                return Err(ConfigError::InvalidRelayUrl(reason));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::InvalidRelayUrl(self.relay_url.clone()))?;
        if url.path() == "/" || url.path().is_empty() {
            url.set_path("/socket.io/");
        }
        url.set_query(Some("EIO=4&transport=websocket"));
        Ok(url)
    }

    /// Origin of the configured page, e.g. `https://dapp.example`.
    pub fn page_origin(&self) -> Option<String> {
        let page = self.page_url.as_deref()?;
        match Url::parse(page) {
            Ok(url) => Some(url.origin().ascii_serialization()),
            Err(_) => Some(page.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid relay url: {0}")]
    InvalidRelayUrl(String),
}
