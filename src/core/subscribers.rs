//! Live subscriber connections.
//!
//! The registry only tracks handles; connections are opened by the transport
//! and closed either by the transport or by a failed delivery. Iteration copies
//! the member list out of the map so no shard lock is held while delivering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;

use crate::error::DeliveryError;

/// One live duplex connection that accepts serialized snapshots.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Push one encoded snapshot. May wait on the connection's outbound buffer.
    async fn deliver(&self, payload: &str) -> Result<(), DeliveryError>;

    /// Close the connection. Must be safe to call more than once.
    async fn close(&self);

    /// Human-readable peer description for logs.
    fn peer(&self) -> String {
        "unknown".to_string()
    }
}

/// Opaque handle returned by [`SubscriberRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Close a subscriber, giving up after `timeout`. The connection is abandoned either way.
pub async fn close_with_timeout(
    id: SubscriberId,
    subscriber: &dyn Subscriber,
    timeout: Duration,
) {
    if tokio::time::timeout(timeout, subscriber.close()).await.is_err() {
        tracing::debug!(subscriber = %id, "Close timed out");
    }
}

struct Member {
    subscriber: Arc<dyn Subscriber>,
    /// Lowest snapshot sequence number this subscriber still wants.
    min_seq: AtomicU64,
}

/// Concurrency-safe set of subscribers.
pub struct SubscriberRegistry {
    members: DashMap<SubscriberId, Member>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber that receives every snapshot from now on.
    pub fn add(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        self.insert(subscriber, 0)
    }

    /// Register a subscriber that receives nothing until [`resume_after`](Self::resume_after).
    pub fn add_paused(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        self.insert(subscriber, u64::MAX)
    }

    fn insert(&self, subscriber: Arc<dyn Subscriber>, min_seq: u64) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.members.insert(
            id,
            Member {
                subscriber,
                min_seq: AtomicU64::new(min_seq),
            },
        );
        id
    }

    /// Deliver only snapshots produced after `seq` to this subscriber.
    pub fn resume_after(&self, id: SubscriberId, seq: u64) {
        if let Some(member) = self.members.get(&id) {
            member.min_seq.store(seq.saturating_add(1), Ordering::SeqCst);
        }
    }

    /// Remove a subscriber. Unknown or already-removed ids are ignored.
    pub fn remove(&self, id: SubscriberId) -> Option<Arc<dyn Subscriber>> {
        self.members.remove(&id).map(|(_, member)| member.subscriber)
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Copy of the current member list.
    pub fn members(&self) -> Vec<(SubscriberId, Arc<dyn Subscriber>)> {
        self.members
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(&entry.value().subscriber)))
            .collect()
    }

    /// Copy of the members that should receive snapshot number `seq`.
    pub fn recipients(&self, seq: u64) -> Vec<(SubscriberId, Arc<dyn Subscriber>)> {
        self.members
            .iter()
            .filter(|entry| entry.value().min_seq.load(Ordering::SeqCst) <= seq)
            .map(|entry| (*entry.key(), Arc::clone(&entry.value().subscriber)))
            .collect()
    }

    /// Remove and close every subscriber concurrently, each close bounded by `timeout`.
    pub async fn close_all(&self, timeout: Duration) {
        let ids: Vec<SubscriberId> = self.members.iter().map(|e| *e.key()).collect();
        let removed: Vec<(SubscriberId, Arc<dyn Subscriber>)> = ids
            .into_iter()
            .filter_map(|id| self.remove(id).map(|sub| (id, sub)))
            .collect();

        join_all(
            removed
                .iter()
                .map(|(id, sub)| close_with_timeout(*id, sub.as_ref(), timeout)),
        )
        .await;
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
