//! Per-device traffic accounting using DashMap for sharded concurrent access.
//!
//! Every observed hardware address gets one [`DeviceRecord`] holding cumulative
//! byte and packet counters in both directions. Writers lock only the shard that
//! owns the key, so attribution to disjoint devices proceeds in parallel while
//! readers see each record either fully before or fully after an update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::BROADCAST_MAC;
use crate::core::snapshot::Snapshot;

/// Cumulative counters for one hardware address.
///
/// Serialized with the field names the dashboard already consumes
/// (`mac`, `ip`, `bytesRecv`, `packetsRecv`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Hardware address, the aggregation key.
    #[serde(rename = "mac")]
    pub identity: String,
    /// First non-empty network-layer address seen for this device.
    #[serde(rename = "ip")]
    pub address: String,
    pub bytes_sent: u64,
    #[serde(rename = "bytesRecv")]
    pub bytes_received: u64,
    pub packets_sent: u64,
    #[serde(rename = "packetsRecv")]
    pub packets_received: u64,
    /// Time of the most recent frame attributed to this device.
    pub last_seen: DateTime<Utc>,
    /// Reserved for name resolution; always empty for now.
    #[serde(default)]
    pub hostname: String,
}

impl DeviceRecord {
    fn new(identity: &str, now: DateTime<Utc>) -> Self {
        Self {
            identity: identity.to_string(),
            address: String::new(),
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
            last_seen: now,
            hostname: String::new(),
        }
    }

    /// Bytes in both directions; the snapshot ordering key.
    pub fn total_bytes(&self) -> u64 {
        self.bytes_sent.saturating_add(self.bytes_received)
    }

    /// Packets in both directions.
    pub fn total_packets(&self) -> u64 {
        self.packets_sent.saturating_add(self.packets_received)
    }

    fn credit(&mut self, direction: Direction, frame_size: u64, address: &str, now: DateTime<Utc>) {
        match direction {
            Direction::Sent => {
                self.bytes_sent = self.bytes_sent.saturating_add(frame_size);
                self.packets_sent = self.packets_sent.saturating_add(1);
            }
            Direction::Received => {
                self.bytes_received = self.bytes_received.saturating_add(frame_size);
                self.packets_received = self.packets_received.saturating_add(1);
            }
        }
        self.last_seen = now;
        if self.address.is_empty() && !address.is_empty() {
            self.address = address.to_string();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Sent,
    Received,
}

/// Returns false for the empty identity and the broadcast address.
pub fn is_attributable(identity: &str) -> bool {
    !identity.is_empty() && !identity.eq_ignore_ascii_case(BROADCAST_MAC)
}

/// Thread-safe device registry. Keyed by hardware address.
pub struct DeviceRegistry {
    devices: DashMap<String, DeviceRecord>,
    started_at: Instant,
    last_seq: AtomicU64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
            started_at: Instant::now(),
            last_seq: AtomicU64::new(0),
        }
    }

    /// Credit one frame to its source and destination devices. Called from the ingestion thread.
    ///
    /// Each side is skipped when its identity is empty or the broadcast address.
    /// The two sides are updated one after the other, never holding both shard locks.
    pub fn attribute(
        &self,
        src_identity: &str,
        src_address: &str,
        dst_identity: &str,
        dst_address: &str,
        frame_size: u64,
    ) {
        let now = Utc::now();
        self.credit(src_identity, src_address, Direction::Sent, frame_size, now);
        self.credit(dst_identity, dst_address, Direction::Received, frame_size, now);
    }

    fn credit(
        &self,
        identity: &str,
        address: &str,
        direction: Direction,
        frame_size: u64,
        now: DateTime<Utc>,
    ) {
        if !is_attributable(identity) {
            return;
        }
        // Fast path avoids allocating the key for devices already known.
        if let Some(mut record) = self.devices.get_mut(identity) {
            record.credit(direction, frame_size, address, now);
            return;
        }
        self.devices
            .entry(identity.to_string())
            .or_insert_with(|| DeviceRecord::new(identity, now))
            .credit(direction, frame_size, address, now);
    }

    /// Produce an owned, ordered snapshot of every device.
    ///
    /// Each snapshot carries a sequence number, starting at 1 and strictly increasing.
    pub fn snapshot(&self) -> Snapshot {
        let seq = self.last_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let records: Vec<DeviceRecord> = self
            .devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        Snapshot::new(records, self.started_at.elapsed()).with_seq(seq)
    }

    /// Copy of one device's record, if it has ever been seen.
    pub fn lookup(&self, identity: &str) -> Option<DeviceRecord> {
        self.devices.get(identity).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Remove devices whose last frame is older than `max_idle`. Returns how many were removed.
    ///
    /// Only called when idle eviction is configured; by default records live for the whole process.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let Ok(max_idle) = chrono::Duration::from_std(max_idle) else {
            return 0;
        };
        let cutoff = Utc::now() - max_idle;
        let before = self.devices.len();
        self.devices.retain(|_, record| record.last_seen >= cutoff);
        before.saturating_sub(self.devices.len())
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
