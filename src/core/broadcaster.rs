//! Fan-out of queued snapshots to every live subscriber.
//!
//! Each snapshot is encoded once. Deliveries run concurrently and each one is
//! bounded by the delivery timeout, so the slowest subscriber costs at most one
//! timeout per snapshot and never delays the others. Subscribers whose delivery
//! fails or times out are closed and dropped from the registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::core::queue::BroadcastReceiver;
use crate::core::subscribers::{close_with_timeout, Subscriber, SubscriberId, SubscriberRegistry};
use crate::error::DeliveryError;

/// Running totals across the broadcaster's lifetime.
#[derive(Debug, Default)]
pub struct FanOutStats {
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    failures: AtomicU64,
}

impl FanOutStats {
    /// Snapshots fully fanned out.
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }

    /// Successful per-subscriber deliveries.
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Deliveries that failed or timed out (each removed a subscriber).
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Outcome of delivering one payload to the current subscriber set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub removed: Vec<SubscriberId>,
}

/// Deliver `payload` with a bounded timeout. Timeouts are reported as [`DeliveryError::TimedOut`].
pub async fn deliver_with_timeout(
    subscriber: &dyn Subscriber,
    payload: &str,
    timeout: Duration,
) -> Result<(), DeliveryError> {
    match tokio::time::timeout(timeout, subscriber.deliver(payload)).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::TimedOut(timeout)),
    }
}

/// Close a subscriber after a failed delivery and drop it from the registry.
pub async fn drop_subscriber(
    subscribers: &SubscriberRegistry,
    id: SubscriberId,
    subscriber: &dyn Subscriber,
    timeout: Duration,
) {
    subscribers.remove(id);
    // A wedged connection may not even close in time; it is already out of the set.
    close_with_timeout(id, subscriber, timeout).await;
}

/// Deliver snapshot number `seq` to every subscriber that wants it when the call starts.
///
/// Subscribers that joined after `seq` was produced are skipped. A failing subscriber
/// is dropped inside its own delivery future, so wedged peers are closed concurrently.
pub async fn fan_out(
    subscribers: &SubscriberRegistry,
    seq: u64,
    payload: &str,
    timeout: Duration,
) -> FanOutReport {
    let recipients = subscribers.recipients(seq);
    if recipients.is_empty() {
        return FanOutReport::default();
    }

    let outcomes = join_all(recipients.iter().map(|(id, sub)| async move {
        match deliver_with_timeout(sub.as_ref(), payload, timeout).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(subscriber = %id, peer = %sub.peer(), error = %e, "Dropping subscriber");
                drop_subscriber(subscribers, *id, sub.as_ref(), timeout).await;
                Some(*id)
            }
        }
    }))
    .await;

    let mut report = FanOutReport::default();
    for outcome in outcomes {
        match outcome {
            None => report.delivered += 1,
            Some(id) => report.removed.push(id),
        }
    }
    report
}

/// Drain the queue until it is closed, fanning out each snapshot.
pub async fn run_broadcaster(
    mut queue: BroadcastReceiver,
    subscribers: Arc<SubscriberRegistry>,
    delivery_timeout: Duration,
    stats: Arc<FanOutStats>,
) {
    tracing::debug!("Broadcaster started");
    while let Some(snapshot) = queue.pop().await {
        let payload = match snapshot.to_json() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Failed to encode snapshot: {e}");
                continue;
            }
        };

        let report = fan_out(&subscribers, snapshot.seq, &payload, delivery_timeout).await;
        stats.deliveries.fetch_add(report.delivered as u64, Ordering::Relaxed);
        stats.failures.fetch_add(report.removed.len() as u64, Ordering::Relaxed);
        stats.broadcasts.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(
            devices = snapshot.active_devices,
            delivered = report.delivered,
            removed = report.removed.len(),
            "Snapshot broadcast"
        );
    }
    tracing::info!(
        broadcasts = stats.broadcasts(),
        deliveries = stats.deliveries(),
        failures = stats.failures(),
        "Broadcaster stopped"
    );
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::core::queue::broadcast_queue;
    use crate::core::snapshot::Snapshot;
    use crate::core::subscribers::testing::{Behavior, MockSubscriber};

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_failing_subscriber_removed_others_still_receive() {
        let registry = SubscriberRegistry::new();
        let healthy_a = MockSubscriber::new(Behavior::Accept);
        let failing = MockSubscriber::new(Behavior::Fail);
        let healthy_b = MockSubscriber::new(Behavior::Accept);
        let a = registry.add(healthy_a.clone());
        let bad = registry.add(failing.clone());
        let b = registry.add(healthy_b.clone());

        let report = fan_out(&registry, 1, "payload-1", TIMEOUT).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.removed, vec![bad]);
        assert_eq!(healthy_a.received(), vec!["payload-1"]);
        assert_eq!(healthy_b.received(), vec!["payload-1"]);
        assert!(failing.is_closed());
        assert!(!registry.contains(bad));
        assert!(registry.contains(a) && registry.contains(b));
    }

    #[tokio::test]
    async fn test_stalled_subscriber_times_out_without_delaying_others() {
        let registry = SubscriberRegistry::new();
        let fast = MockSubscriber::new(Behavior::Accept);
        let stalled = MockSubscriber::new(Behavior::Stall(Duration::from_secs(30)));
        registry.add(fast.clone());
        let slow_id = registry.add(stalled.clone());

        let started = Instant::now();
        let report = fan_out(&registry, 1, "tick", TIMEOUT).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.removed, vec![slow_id]);
        assert_eq!(fast.received(), vec!["tick"]);
        assert!(stalled.received().is_empty());
        assert!(stalled.is_closed());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_wedged_subscribers_are_closed_concurrently() {
        let registry = SubscriberRegistry::new();
        let healthy = MockSubscriber::new(Behavior::Accept);
        registry.add(healthy.clone());
        for _ in 0..4 {
            registry.add(MockSubscriber::with_hanging_close(Behavior::Fail));
        }

        let started = Instant::now();
        let report = fan_out(&registry, 1, "tick", TIMEOUT).await;

        // One close timeout in total, not one per wedged peer.
        assert!(started.elapsed() < TIMEOUT * 3);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.removed.len(), 4);
        assert_eq!(registry.len(), 1);
        assert_eq!(healthy.received(), vec!["tick"]);
    }

    #[tokio::test]
    async fn test_fan_out_skips_subscribers_that_joined_later() {
        let registry = SubscriberRegistry::new();
        let early = MockSubscriber::new(Behavior::Accept);
        let late = MockSubscriber::new(Behavior::Accept);
        registry.add(early.clone());
        let late_id = registry.add_paused(late.clone());
        registry.resume_after(late_id, 4);

        fan_out(&registry, 3, "old", TIMEOUT).await;
        fan_out(&registry, 5, "new", TIMEOUT).await;

        assert_eq!(early.received(), vec!["old", "new"]);
        assert_eq!(late.received(), vec!["new"]);
    }

    #[tokio::test]
    async fn test_fan_out_with_no_subscribers() {
        let registry = SubscriberRegistry::new();
        assert_eq!(fan_out(&registry, 1, "x", TIMEOUT).await, FanOutReport::default());
    }

    #[tokio::test]
    async fn test_removing_unknown_subscriber_does_not_affect_delivery() {
        let registry = SubscriberRegistry::new();
        let sub = MockSubscriber::new(Behavior::Accept);
        registry.add(sub.clone());
        let ghost = registry.add(MockSubscriber::new(Behavior::Accept));
        registry.remove(ghost);
        registry.remove(ghost);

        let report = fan_out(&registry, 1, "still here", TIMEOUT).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(sub.received(), vec!["still here"]);
    }

    #[tokio::test]
    async fn test_broadcaster_preserves_order_and_stops_on_close() {
        let registry = Arc::new(SubscriberRegistry::new());
        let sub = MockSubscriber::new(Behavior::Accept);
        registry.add(sub.clone());
        let stats = Arc::new(FanOutStats::default());

        let (tx, rx) = broadcast_queue(8);
        for secs in 1..=3 {
            assert!(tx.try_push(Arc::new(Snapshot::new(Vec::new(), Duration::from_secs(secs)))));
        }
        drop(tx);

        run_broadcaster(rx, Arc::clone(&registry), TIMEOUT, Arc::clone(&stats)).await;

        let durations: Vec<f64> = sub
            .received()
            .iter()
            .map(|p| serde_json::from_str::<Snapshot>(p).unwrap().monitor_duration)
            .collect();
        assert_eq!(durations, vec![1.0, 2.0, 3.0]);
        assert_eq!(stats.broadcasts(), 3);
        assert_eq!(stats.deliveries(), 3);
        assert_eq!(stats.failures(), 0);
    }
}
