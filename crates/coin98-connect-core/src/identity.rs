//! Connection identities.
//!
//! An identity is the opaque token the relay uses to route wallet replies
//! back to one client instance. A fresh one is drawn from an
//! [`IdentityProvider`] for every handshake, and replaced by the connection
//! string the relay acknowledges with.
//!
//! Providers:
//! - [`RandomIdentity`] - UUID v4 tokens
//! - [`CounterIdentity`] - process-local counter with a random prefix
//! - [`DeviceIdentity`] - platform fingerprint, falling back to random tokens

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque, non-empty connection identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConnectionIdentity(String);

impl ConnectionIdentity {
    /// Create an identity, rejecting empty values.
    pub fn new(value: impl Into<String>) -> Result<Self, IdentityError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConnectionIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ConnectionIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ConnectionIdentity {
    type Error = IdentityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ConnectionIdentity> for String {
    fn from(id: ConnectionIdentity) -> Self {
        id.0
    }
}

/// Error building an identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("connection identity cannot be empty")]
    Empty,
}

/// Source of connection identities.
///
/// Implementations never fail: a provider whose platform source is missing
/// must fall back to a process-local generator.
pub trait IdentityProvider: Send + Sync {
    fn new_identity(&self) -> ConnectionIdentity;
}

/// Random UUID v4 identities.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdentity;

impl IdentityProvider for RandomIdentity {
    fn new_identity(&self) -> ConnectionIdentity {
        ConnectionIdentity(uuid::Uuid::new_v4().to_string())
    }
}

/// Counter-based identities.
///
/// The random prefix keeps two processes on one device apart; the counter
/// keeps identities from one process apart.
#[derive(Debug)]
pub struct CounterIdentity {
    prefix: String,
    next: AtomicU64,
}

impl CounterIdentity {
    pub fn new() -> Self {
        let mut prefix = uuid::Uuid::new_v4().simple().to_string();
        prefix.truncate(8);
        Self::with_prefix(prefix)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl Default for CounterIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for CounterIdentity {
    fn new_identity(&self) -> ConnectionIdentity {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        ConnectionIdentity(format!("{}{}", self.prefix, n))
    }
}

/// Device-bound identities.
///
/// `source` reads a platform fingerprint; when it yields nothing (or an
/// empty string) a random identity is used instead.
pub struct DeviceIdentity<F> {
    source: F,
    fallback: RandomIdentity,
}

impl<F> DeviceIdentity<F>
where
    F: Fn() -> Option<String> + Send + Sync,
{
    pub fn new(source: F) -> Self {
        Self {
            source,
            fallback: RandomIdentity,
        }
    }
}

impl<F> IdentityProvider for DeviceIdentity<F>
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn new_identity(&self) -> ConnectionIdentity {
        match (self.source)().map(ConnectionIdentity::new) {
            Some(Ok(id)) => id,
            _ => {
                tracing::debug!("device identity unavailable, using a random token");
                self.fallback.new_identity()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn rejects_empty() {
        assert_eq!(ConnectionIdentity::new(""), Err(IdentityError::Empty));
        assert!("".parse::<ConnectionIdentity>().is_err());
    }

    #[test]
    fn serde_rejects_empty() {
        let err = serde_json::from_str::<ConnectionIdentity>("\"\"");
        assert!(err.is_err());
        let id: ConnectionIdentity = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.as_str(), "abc");
    }

    #[test]
    fn random_identities_are_distinct() {
        let provider = RandomIdentity;
        let ids: HashSet<_> = (0..64).map(|_| provider.new_identity()).collect();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn counter_identities_share_prefix() {
        let provider = CounterIdentity::with_prefix("app-");
        assert_eq!(provider.new_identity().as_str(), "app-1");
        assert_eq!(provider.new_identity().as_str(), "app-2");
    }

    #[test]
    fn device_identity_falls_back() {
        let device = DeviceIdentity::new(|| Some("device-42".to_string()));
        assert_eq!(device.new_identity().as_str(), "device-42");

        let missing = DeviceIdentity::new(|| None);
        assert!(!missing.new_identity().as_str().is_empty());

        let empty = DeviceIdentity::new(|| Some(String::new()));
        assert!(!empty.new_identity().as_str().is_empty());
    }
}
