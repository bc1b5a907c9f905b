//! Immutable point-in-time view of all devices plus network-wide totals.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::devices::DeviceRecord;

/// Snapshot of every device, ordered by total bytes descending.
///
/// Owns its records; later registry updates never show up here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub devices: Vec<DeviceRecord>,
    pub total_sent: u64,
    pub total_recv: u64,
    /// Sent plus received packets, summed over devices.
    pub total_packets: u64,
    pub active_devices: usize,
    /// Seconds since monitoring started.
    pub monitor_duration: f64,
    pub timestamp: DateTime<Utc>,
    /// Production order within one registry. Not sent on the wire.
    #[serde(skip)]
    pub seq: u64,
}

impl Snapshot {
    /// Build a snapshot from copied records, computing totals and ordering.
    pub fn new(mut devices: Vec<DeviceRecord>, monitored_for: Duration) -> Self {
        let mut total_sent = 0u64;
        let mut total_recv = 0u64;
        let mut total_packets = 0u64;
        for d in &devices {
            total_sent = total_sent.saturating_add(d.bytes_sent);
            total_recv = total_recv.saturating_add(d.bytes_received);
            total_packets = total_packets.saturating_add(d.total_packets());
        }

        devices.sort_unstable_by(|a, b| b.total_bytes().cmp(&a.total_bytes()));

        Self {
            active_devices: devices.len(),
            devices,
            total_sent,
            total_recv,
            total_packets,
            monitor_duration: monitored_for.as_secs_f64(),
            timestamp: Utc::now(),
            seq: 0,
        }
    }

    /// Stamp the production sequence number.
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Encode for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
