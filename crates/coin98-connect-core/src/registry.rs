//! Pending-call registry.
//!
//! Each dispatched request parks a one-shot waiter under its correlation id.
//! An inbound event resolves the waiter for its id and nothing else; a second
//! event for the same id finds an empty slot and is ignored.

use crate::{ConnectError, WalletResponse};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, oneshot};

static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

/// Token linking an outbound request to its inbound result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Allocate the next id. Ids come from one process-wide counter, so they
    /// are never reused, even across client instances.
    pub fn next() -> Self {
        Self(NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// What happens to waiters when the session goes away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonPolicy {
    /// Fail every waiter with [`ConnectError::Disconnected`].
    #[default]
    Reject,
    /// Keep waiters parked until the next session is established, then fail
    /// them with [`ConnectError::Disconnected`]. Until then callers see a
    /// call that never completes.
    Detach,
}

type Slot = oneshot::Sender<Result<WalletResponse, ConnectError>>;

/// Outstanding requests keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingCalls {
    policy: AbandonPolicy,
    slots: Mutex<HashMap<CorrelationId, Slot>>,
    detached: Mutex<Vec<Slot>>,
}

impl PendingCalls {
    pub fn new(policy: AbandonPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> AbandonPolicy {
        self.policy
    }

    /// Park a waiter for `id`.
    pub async fn register(&self, id: CorrelationId) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        if self.slots.lock().await.insert(id.clone(), tx).is_some() {
            tracing::warn!(%id, "correlation id registered twice, dropping the older waiter");
        }
        PendingCall { id, rx }
    }

    /// Hand `response` to the waiter for `id`.
    ///
    /// Returns `true` iff a waiter existed and received the response.
    pub async fn resolve(&self, id: &CorrelationId, response: WalletResponse) -> bool {
        let Some(slot) = self.slots.lock().await.remove(id) else {
            return false;
        };
        slot.send(Ok(response)).is_ok()
    }

    /// Drop the waiter for `id` without resolving it (failed dispatch).
    pub async fn forget(&self, id: &CorrelationId) -> bool {
        self.slots.lock().await.remove(id).is_some()
    }

    /// Empty the registry according to the policy. Returns how many waiters
    /// were abandoned.
    pub async fn abandon_all(&self) -> usize {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .await
            .drain()
            .map(|(_, slot)| slot)
            .collect();
        let count = slots.len();
        match self.policy {
            AbandonPolicy::Reject => {
                for slot in slots {
                    let _ = slot.send(Err(ConnectError::Disconnected));
                }
            }
            AbandonPolicy::Detach => {
                let mut detached = self.detached.lock().await;
                detached.retain(|slot| !slot.is_closed());
                detached.extend(slots);
            }
        }
        count
    }

    /// Fail every waiter parked by a previous [`abandon_all`](Self::abandon_all)
    /// under the detach policy. Returns how many were still waiting.
    pub async fn release_detached(&self) -> usize {
        let released: Vec<Slot> = self.detached.lock().await.drain(..).collect();
        released
            .into_iter()
            .filter_map(|slot| slot.send(Err(ConnectError::Disconnected)).ok())
            .count()
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}

/// The consumer half of a pending call.
#[derive(Debug)]
pub struct PendingCall {
    id: CorrelationId,
    rx: oneshot::Receiver<Result<WalletResponse, ConnectError>>,
}

impl PendingCall {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Wait for the matching inbound event.
    pub async fn wait(self) -> Result<WalletResponse, ConnectError> {
        self.rx.await.unwrap_or(Err(ConnectError::Disconnected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;

    #[test]
    fn ids_are_distinct() {
        let ids: HashSet<_> = (0..1000).map(|_| CorrelationId::next()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn resolves_once() {
        let calls = PendingCalls::default();
        let id = CorrelationId::next();
        let waiter = calls.register(id.clone()).await;

        assert!(calls.resolve(&id, WalletResponse::ok(json!(1))).await);
        assert!(!calls.resolve(&id, WalletResponse::ok(json!(2))).await);

        let response = waiter.wait().await.unwrap();
        assert_eq!(response.result, Some(json!(1)));
    }

    #[tokio::test]
    async fn unknown_id_is_ignored() {
        let calls = PendingCalls::default();
        let _waiter = calls.register(CorrelationId::from("a")).await;
        assert!(!calls.resolve(&CorrelationId::from("b"), WalletResponse::default()).await);
        assert_eq!(calls.len().await, 1);
    }

    #[tokio::test]
    async fn out_of_order_resolution() {
        let calls = PendingCalls::default();
        let a = calls.register(CorrelationId::from("A")).await;
        let b = calls.register(CorrelationId::from("B")).await;

        calls.resolve(&CorrelationId::from("B"), WalletResponse::ok(json!("b"))).await;
        assert_eq!(b.wait().await.unwrap().result, Some(json!("b")));

        let a = tokio::spawn(a.wait());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!a.is_finished());

        calls.resolve(&CorrelationId::from("A"), WalletResponse::ok(json!("a"))).await;
        assert_eq!(a.await.unwrap().unwrap().result, Some(json!("a")));
    }

    #[tokio::test]
    async fn abandon_rejects() {
        let calls = PendingCalls::new(AbandonPolicy::Reject);
        let waiter = calls.register(CorrelationId::next()).await;
        assert_eq!(calls.abandon_all().await, 1);
        assert_eq!(waiter.wait().await, Err(ConnectError::Disconnected));
        assert!(calls.is_empty().await);
    }

    #[tokio::test]
    async fn abandon_detaches() {
        let calls = PendingCalls::new(AbandonPolicy::Detach);
        let id = CorrelationId::next();
        let waiter = calls.register(id.clone()).await;
        assert_eq!(calls.abandon_all().await, 1);
        assert!(!calls.resolve(&id, WalletResponse::default()).await);

        let stalled = tokio::time::timeout(Duration::from_millis(20), waiter.wait()).await;
        assert!(stalled.is_err());
    }

    #[tokio::test]
    async fn release_fails_detached_waiters() {
        let calls = PendingCalls::new(AbandonPolicy::Detach);
        let waiter = calls.register(CorrelationId::next()).await;
        calls.abandon_all().await;

        assert_eq!(calls.release_detached().await, 1);
        assert_eq!(waiter.wait().await, Err(ConnectError::Disconnected));
        assert_eq!(calls.release_detached().await, 0);
    }

    #[tokio::test]
    async fn detached_waiters_that_gave_up_are_pruned() {
        let calls = PendingCalls::new(AbandonPolicy::Detach);
        let gone = calls.register(CorrelationId::next()).await;
        calls.abandon_all().await;
        drop(gone);

        let _kept = calls.register(CorrelationId::next()).await;
        calls.abandon_all().await;
        assert_eq!(calls.release_detached().await, 1);
    }

    #[tokio::test]
    async fn forget_drops_slot() {
        let calls = PendingCalls::default();
        let id = CorrelationId::next();
        let waiter = calls.register(id.clone()).await;
        assert!(calls.forget(&id).await);
        assert_eq!(waiter.wait().await, Err(ConnectError::Disconnected));
    }
}
