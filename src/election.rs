use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::sync::{RwLock, watch};
use tracing::debug;

/// Exclusive right among sibling instances to drive the outbox drain.
///
/// A backend must deliver leadership to at most one instance at a time
/// across the process group it coordinates. Subscription is a watch
/// channel; dropping the receiver unsubscribes.
#[async_trait]
pub trait LeaderElection: Send + Sync {
    async fn request_leadership(&self) -> bool;

    async fn release_leadership(&self);

    fn is_leader(&self) -> bool;

    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Fallback for hosts without a real election primitive: leadership is
/// always granted, degrading the core to single-instance mode.
#[derive(Debug)]
pub struct NullElection {
    state: watch::Sender<bool>,
}

impl Default for NullElection {
    fn default() -> Self {
        Self::new()
    }
}

impl NullElection {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }
}

#[async_trait]
impl LeaderElection for NullElection {
    async fn request_leadership(&self) -> bool {
        self.state.send_replace(true);
        true
    }

    async fn release_leadership(&self) {
        self.state.send_replace(false);
    }

    fn is_leader(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Shared singleton routing table for in-process election groups.
static GLOBAL_REGISTRY: Lazy<Arc<ElectionRegistry>> =
    Lazy::new(|| Arc::new(ElectionRegistry::default()));

static NEXT_MEMBER_ID: AtomicU64 = AtomicU64::new(0);

/// Expose the global registry so instances can share the same group table.
pub fn election_registry() -> Arc<ElectionRegistry> {
    GLOBAL_REGISTRY.clone()
}

/// Helper to wipe the registry between integration tests.
pub async fn reset_election_registry() {
    GLOBAL_REGISTRY.clear().await;
}

#[derive(Default)]
struct GroupState {
    holder: Option<u64>,
    /// Members that requested leadership while it was held, in arrival
    /// order. Release hands the lease to the front.
    queue: Vec<u64>,
    members: HashMap<u64, watch::Sender<bool>>,
}

/// Group table coordinating [`GroupElection`] instances within one process.
#[derive(Default)]
pub struct ElectionRegistry {
    groups: RwLock<HashMap<String, GroupState>>,
}

impl ElectionRegistry {
    async fn register(&self, group: &str, member_id: u64, signal: watch::Sender<bool>) {
        let mut groups = self.groups.write().await;
        let state = groups.entry(group.to_string()).or_default();
        state.members.insert(member_id, signal);
    }

    async fn request(&self, group: &str, member_id: u64) -> bool {
        let mut groups = self.groups.write().await;
        let state = groups.entry(group.to_string()).or_default();

        match state.holder {
            None => {
                state.holder = Some(member_id);
                state.queue.retain(|id| *id != member_id);
                if let Some(signal) = state.members.get(&member_id) {
                    signal.send_replace(true);
                }
                debug!(group, member_id, "leadership granted");
                true
            }
            Some(holder) if holder == member_id => true,
            Some(_) => {
                if !state.queue.contains(&member_id) {
                    state.queue.push(member_id);
                }
                false
            }
        }
    }

    async fn release(&self, group: &str, member_id: u64) {
        let mut groups = self.groups.write().await;
        let Some(state) = groups.get_mut(group) else {
            return;
        };

        if state.holder != Some(member_id) {
            state.queue.retain(|id| *id != member_id);
            return;
        }

        state.holder = None;
        if let Some(signal) = state.members.get(&member_id) {
            signal.send_replace(false);
        }

        if !state.queue.is_empty() {
            let next = state.queue.remove(0);
            state.holder = Some(next);
            if let Some(signal) = state.members.get(&next) {
                signal.send_replace(true);
            }
            debug!(group, from = member_id, to = next, "leadership handed over");
        }
    }

    async fn unregister(&self, group: &str, member_id: u64) {
        self.release(group, member_id).await;
        let mut groups = self.groups.write().await;
        if let Some(state) = groups.get_mut(group) {
            state.members.remove(&member_id);
        }
    }

    pub async fn clear(&self) {
        self.groups.write().await.clear();
    }
}

/// In-process leader election: instances joining the same group name
/// coordinate through the global registry. Mirrors the semantics of a
/// browser tab lock without leaving the process.
pub struct GroupElection {
    group: String,
    member_id: u64,
    signal: watch::Sender<bool>,
}

impl GroupElection {
    pub async fn join(group: impl Into<String>) -> Arc<Self> {
        let group = group.into();
        let member_id = NEXT_MEMBER_ID.fetch_add(1, Ordering::SeqCst);
        let (signal, _) = watch::channel(false);
        election_registry()
            .register(&group, member_id, signal.clone())
            .await;
        Arc::new(Self {
            group,
            member_id,
            signal,
        })
    }

    /// Removes this member from the group, releasing leadership first.
    pub async fn leave(&self) {
        election_registry()
            .unregister(&self.group, self.member_id)
            .await;
    }
}

#[async_trait]
impl LeaderElection for GroupElection {
    async fn request_leadership(&self) -> bool {
        election_registry()
            .request(&self.group, self.member_id)
            .await
    }

    async fn release_leadership(&self) {
        election_registry()
            .release(&self.group, self.member_id)
            .await;
    }

    fn is_leader(&self) -> bool {
        *self.signal.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // group names are unique per test: the registry is process-global and
    // these tests run concurrently

    #[tokio::test]
    async fn sole_member_wins_immediately() {
        let a = GroupElection::join("solo").await;
        assert!(!a.is_leader());
        assert!(a.request_leadership().await);
        assert!(a.is_leader());
    }

    #[tokio::test]
    async fn leadership_is_exclusive_and_handed_over_in_order() {
        let a = GroupElection::join("pair").await;
        let b = GroupElection::join("pair").await;
        let c = GroupElection::join("pair").await;

        assert!(a.request_leadership().await);
        assert!(!b.request_leadership().await);
        assert!(!c.request_leadership().await);
        assert!(a.is_leader() && !b.is_leader() && !c.is_leader());

        let mut b_watch = b.subscribe();
        a.release_leadership().await;
        assert!(!a.is_leader());

        b_watch.changed().await.expect("handover signal");
        assert!(*b_watch.borrow());
        assert!(b.is_leader() && !c.is_leader());

        b.release_leadership().await;
        assert!(c.is_leader());
    }

    #[tokio::test]
    async fn releasing_without_holding_is_a_noop() {
        let a = GroupElection::join("idle").await;
        let b = GroupElection::join("idle").await;

        assert!(a.request_leadership().await);
        b.release_leadership().await;
        assert!(a.is_leader());
    }

    #[tokio::test]
    async fn repeated_requests_by_the_holder_stay_true() {
        let a = GroupElection::join("again").await;
        assert!(a.request_leadership().await);
        assert!(a.request_leadership().await);
    }

    #[tokio::test]
    async fn null_election_always_grants() {
        let election = NullElection::new();
        assert!(!election.is_leader());
        assert!(election.request_leadership().await);
        assert!(election.is_leader());
        election.release_leadership().await;
        assert!(!election.is_leader());
        assert!(election.request_leadership().await);
    }
}
