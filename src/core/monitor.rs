//! Query and subscription surface handed to the transport layer.
//!
//! `Monitor` bundles the shared registries so every transport handler works
//! through one cheap-to-clone handle instead of process-wide state.

use std::sync::Arc;
use std::time::Duration;

use crate::core::broadcaster::{deliver_with_timeout, drop_subscriber};
use crate::core::devices::{DeviceRecord, DeviceRegistry};
use crate::core::snapshot::Snapshot;
use crate::core::subscribers::{Subscriber, SubscriberId, SubscriberRegistry};

#[derive(Clone)]
pub struct Monitor {
    devices: Arc<DeviceRegistry>,
    subscribers: Arc<SubscriberRegistry>,
    delivery_timeout: Duration,
}

impl Monitor {
    pub fn new(
        devices: Arc<DeviceRegistry>,
        subscribers: Arc<SubscriberRegistry>,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            devices,
            subscribers,
            delivery_timeout,
        }
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    pub fn subscribers(&self) -> &Arc<SubscriberRegistry> {
        &self.subscribers
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    /// Fresh snapshot, independent of the broadcast cadence.
    pub fn get_snapshot(&self) -> Snapshot {
        self.devices.snapshot()
    }

    pub fn get_device(&self, identity: &str) -> Option<DeviceRecord> {
        self.devices.lookup(identity)
    }

    /// Register a new connection and send it the current state right away.
    ///
    /// The subscriber is registered paused, so it misses snapshots that were
    /// queued before it connected. Once the initial snapshot is delivered it
    /// receives only snapshots produced after that one.
    ///
    /// If that first delivery fails the subscriber is closed and removed again;
    /// the returned id is then already stale, and disconnecting it is a no-op.
    pub async fn on_subscriber_connected(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = self.subscribers.add_paused(Arc::clone(&subscriber));
        tracing::info!(
            subscriber = %id,
            peer = %subscriber.peer(),
            total = self.subscribers.len(),
            "Subscriber connected"
        );

        let snapshot = self.get_snapshot();
        let payload = match snapshot.to_json() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Failed to encode initial snapshot: {e}");
                self.subscribers.resume_after(id, snapshot.seq);
                return id;
            }
        };

        match deliver_with_timeout(subscriber.as_ref(), &payload, self.delivery_timeout).await {
            Ok(()) => self.subscribers.resume_after(id, snapshot.seq),
            Err(e) => {
                tracing::warn!(subscriber = %id, error = %e, "Initial snapshot failed");
                drop_subscriber(&self.subscribers, id, subscriber.as_ref(), self.delivery_timeout)
                    .await;
            }
        }
        id
    }

    /// Forget a connection the transport saw close. Safe to call for unknown ids.
    pub fn on_subscriber_disconnected(&self, id: SubscriberId) {
        if self.subscribers.remove(id).is_some() {
            tracing::info!(
                subscriber = %id,
                total = self.subscribers.len(),
                "Subscriber disconnected"
            );
        }
    }
}
