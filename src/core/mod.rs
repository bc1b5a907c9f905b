//! Core logic: device accounting, snapshots, and the broadcast pipeline.
//!
//! - [`DeviceRegistry`]: per-device byte/packet counters keyed by hardware address
//! - [`Snapshot`]: ordered, owned copy of all devices plus totals
//! - [`queue`]: bounded drop-when-full queue from producer to broadcaster
//! - [`SubscriberRegistry`] / [`Subscriber`]: live connections receiving snapshots
//! - [`broadcaster`]: fan-out with per-subscriber timeouts and pruning
//! - [`producer`]: periodic snapshot production
//! - [`Monitor`]: query and subscription surface for the transport layer

pub mod broadcaster;
pub mod devices;
pub mod monitor;
pub mod producer;
pub mod queue;
pub mod snapshot;
pub mod subscribers;

pub use broadcaster::{FanOutReport, FanOutStats};
pub use devices::{DeviceRecord, DeviceRegistry};
pub use monitor::Monitor;
pub use queue::{broadcast_queue, BroadcastReceiver, BroadcastSender};
pub use snapshot::Snapshot;
pub use subscribers::{Subscriber, SubscriberId, SubscriberRegistry};
