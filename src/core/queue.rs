//! Bounded snapshot queue between the producer and the broadcaster.
//!
//! Pushing never waits: when every slot is taken the new snapshot is handed
//! back as rejected and the queued ones stay untouched. The next tick will
//! supersede it anyway.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::snapshot::Snapshot;

/// Create a queue with room for `capacity` snapshots (at least one).
pub fn broadcast_queue(capacity: usize) -> (BroadcastSender, BroadcastReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BroadcastSender { tx }, BroadcastReceiver { rx })
}

/// Producer half. Dropping every sender closes the queue.
#[derive(Clone)]
pub struct BroadcastSender {
    tx: mpsc::Sender<Arc<Snapshot>>,
}

impl BroadcastSender {
    /// Enqueue without waiting. Returns false if the queue is full or closed.
    pub fn try_push(&self, snapshot: Arc<Snapshot>) -> bool {
        self.tx.try_send(snapshot).is_ok()
    }

    /// Snapshots currently waiting for the broadcaster.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the broadcaster.
pub struct BroadcastReceiver {
    rx: mpsc::Receiver<Arc<Snapshot>>,
}

impl BroadcastReceiver {
    /// Wait for the next snapshot. `None` once the queue is closed and drained.
    pub async fn pop(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.recv().await
    }

    /// Refuse further pushes. Already queued snapshots can still be popped.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
