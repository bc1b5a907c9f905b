//! Periodic snapshot production.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::core::devices::DeviceRegistry;
use crate::core::queue::BroadcastSender;

/// Snapshot the registry every `interval` and offer it to the queue until `shutdown` flips.
///
/// A full queue drops the snapshot. The sender is dropped on return, which closes
/// the queue for the broadcaster.
pub async fn run_snapshot_producer(
    devices: Arc<DeviceRegistry>,
    queue: BroadcastSender,
    interval: Duration,
    evict_idle: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut dropped = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        if let Some(max_idle) = evict_idle {
            let evicted = devices.evict_idle(max_idle);
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted idle devices");
            }
        }

        let snapshot = Arc::new(devices.snapshot());
        if !queue.try_push(snapshot) {
            dropped += 1;
            tracing::debug!(dropped, "Broadcast queue full, snapshot skipped");
        }
    }
    tracing::info!(dropped, "Snapshot producer stopped");
}
