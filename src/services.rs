//! Background service lifecycle management.
//!
//! `BackgroundServices` owns the snapshot producer and the fan-out broadcaster,
//! starting them in dependency order and tearing them down in the reverse one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::MonitorConfig;
use crate::core::broadcaster::{run_broadcaster, FanOutStats};
use crate::core::producer::run_snapshot_producer;
use crate::core::queue::broadcast_queue;
use crate::core::subscribers::SubscriberRegistry;
use crate::core::Monitor;

/// Manages the async tasks spawned at startup.
///
/// Tasks are started in dependency order:
/// 1. Broadcaster (drains the snapshot queue into every subscriber)
/// 2. Snapshot producer (fills the queue every `broadcast_interval`)
pub struct BackgroundServices {
    shutdown: watch::Sender<bool>,
    producer: JoinHandle<()>,
    broadcaster: JoinHandle<()>,
    subscribers: Arc<SubscriberRegistry>,
    stats: Arc<FanOutStats>,
    close_timeout: Duration,
}

impl BackgroundServices {
    /// Start all background services. Must be called inside a tokio runtime.
    pub fn start(monitor: &Monitor, config: &MonitorConfig) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (queue_tx, queue_rx) = broadcast_queue(config.queue_capacity);
        let stats = Arc::new(FanOutStats::default());

        // 1. Broadcaster: ends on its own once the producer drops the queue sender.
        let broadcaster = tokio::spawn(run_broadcaster(
            queue_rx,
            Arc::clone(monitor.subscribers()),
            monitor.delivery_timeout(),
            Arc::clone(&stats),
        ));

        // 2. Producer: owns the only queue sender.
        let producer = tokio::spawn(run_snapshot_producer(
            Arc::clone(monitor.devices()),
            queue_tx,
            config.broadcast_interval,
            config.device_idle_timeout,
            shutdown_rx,
        ));

        tracing::info!(
            interval_ms = config.broadcast_interval.as_millis() as u64,
            queue_capacity = config.queue_capacity,
            "Background services started"
        );

        Self {
            shutdown,
            producer,
            broadcaster,
            subscribers: Arc::clone(monitor.subscribers()),
            stats,
            close_timeout: monitor.delivery_timeout(),
        }
    }

    pub fn stats(&self) -> &Arc<FanOutStats> {
        &self.stats
    }

    /// Flips to `true` when shutdown begins. Connection tasks select on it.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Stop the producer timer (closing the queue), wait for the broadcaster to
    /// finish, then close every remaining subscriber connection. Each close is
    /// bounded by the delivery timeout.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);

        if let Err(e) = self.producer.await {
            tracing::error!("Snapshot producer task failed: {e}");
        }
        if let Err(e) = self.broadcaster.await {
            tracing::error!("Broadcaster task failed: {e}");
        }

        let remaining = self.subscribers.len();
        self.subscribers.close_all(self.close_timeout).await;
        tracing::info!(closed = remaining, "Background services stopped");
    }
}
