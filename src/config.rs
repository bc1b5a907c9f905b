//! Centralized runtime constants and the owned monitor configuration.
//!
//! All tunable intervals, capacities and timeouts are collected here so they can
//! be found and adjusted in a single place rather than scattered across modules.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Interval at which snapshots are produced and pushed to subscribers (seconds).
pub const DEFAULT_BROADCAST_INTERVAL_SECS: u64 = 2;

/// Capacity of the snapshot queue between the producer and the broadcaster.
pub const BROADCAST_QUEUE_CAPACITY: usize = 256;

/// Upper bound on a single delivery to a single subscriber (seconds).
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 5;

/// Read timeout of the capture handle, bounds how long a stop request goes unnoticed (milliseconds).
pub const CAPTURE_READ_TIMEOUT_MS: u64 = 500;

/// Receive buffer for the capture channel. Large enough for offloaded super-frames.
pub const CAPTURE_BUFFER_SIZE: usize = 65536;

/// Default HTTP bind host (all interfaces).
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8080;

/// The all-ones link-layer address. Never attributed to a device.
pub const BROADCAST_MAC: &str = "ff:ff:ff:ff:ff:ff";

/// Runtime configuration for one monitor instance.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interface to capture on (`None` = auto-select)
    pub interface: Option<String>,

    /// HTTP/websocket bind address
    pub bind_addr: SocketAddr,

    /// Snapshot production interval
    pub broadcast_interval: Duration,

    /// Snapshot queue capacity
    pub queue_capacity: usize,

    /// Per-subscriber delivery timeout
    pub delivery_timeout: Duration,

    /// Capture read timeout
    pub capture_read_timeout: Duration,

    /// Devices idle longer than this are evicted before each snapshot (`None` = keep forever)
    pub device_idle_timeout: Option<Duration>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interface: None,
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            broadcast_interval: Duration::from_secs(DEFAULT_BROADCAST_INTERVAL_SECS),
            queue_capacity: BROADCAST_QUEUE_CAPACITY,
            delivery_timeout: Duration::from_secs(DEFAULT_DELIVERY_TIMEOUT_SECS),
            capture_read_timeout: Duration::from_millis(CAPTURE_READ_TIMEOUT_MS),
            device_idle_timeout: None,
        }
    }
}

impl MonitorConfig {
    /// Set the capture interface
    pub fn interface(mut self, name: impl Into<String>) -> Self {
        self.interface = Some(name.into());
        self
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the snapshot interval. Zero is clamped to one millisecond.
    pub fn broadcast_interval(mut self, interval: Duration) -> Self {
        self.broadcast_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the queue capacity. Zero is clamped to one slot.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the per-subscriber delivery timeout
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Enable idle-device eviction
    pub fn evict_idle_after(mut self, idle: Duration) -> Self {
        self.device_idle_timeout = Some(idle);
        self
    }
}
