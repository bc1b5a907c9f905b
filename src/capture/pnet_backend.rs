//! Live capture using a pnet datalink channel.
//!
//! Opens the interface in promiscuous mode with a read timeout so the ingestion
//! thread wakes up regularly and can observe a stop request.

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use pnet::datalink::{self, Channel, Config, DataLinkReceiver, NetworkInterface};

use crate::capture::{decode_ethernet_frame, FrameSource, SourceEvent};
use crate::config::CAPTURE_BUFFER_SIZE;
use crate::error::CaptureError;

/// All interfaces known to the OS.
pub fn list_interfaces() -> Vec<NetworkInterface> {
    datalink::interfaces()
}

/// Pick the capture interface.
///
/// An explicit name must exist. Otherwise the first non-loopback interface with
/// addresses wins, falling back to the first interface at all.
pub fn select_interface(
    interfaces: &[NetworkInterface],
    requested: Option<&str>,
) -> Result<NetworkInterface, CaptureError> {
    if interfaces.is_empty() {
        return Err(CaptureError::NoInterfaces);
    }

    if let Some(name) = requested {
        return interfaces
            .iter()
            .find(|iface| iface.name == name)
            .cloned()
            .ok_or_else(|| CaptureError::NoSuchInterface(name.to_string()));
    }

    let chosen = interfaces
        .iter()
        .find(|iface| !iface.is_loopback() && !iface.ips.is_empty())
        .unwrap_or(&interfaces[0]);
    Ok(chosen.clone())
}

/// First IPv4 address bound to the interface.
pub fn local_ipv4(iface: &NetworkInterface) -> Option<Ipv4Addr> {
    iface.ips.iter().find_map(|net| match net.ip() {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(_) => None,
    })
}

/// One `--list` entry: index, name, optional description, then one line per address.
pub fn describe_interface(index: usize, iface: &NetworkInterface) -> String {
    let mut out = format!("[{index}] {}", iface.name);
    if !iface.description.is_empty() {
        out.push_str(&format!(" ({})", iface.description));
    }
    for net in &iface.ips {
        out.push_str(&format!("\n    IP: {}", net.ip()));
    }
    out
}

/// Frame source reading from a live interface.
pub struct PnetSource {
    interface: String,
    rx: Box<dyn DataLinkReceiver>,
}

impl PnetSource {
    /// Open a receive channel. Usually needs root or CAP_NET_RAW.
    pub fn open(iface: &NetworkInterface, read_timeout: Duration) -> Result<Self, CaptureError> {
        let config = Config {
            read_timeout: Some(read_timeout),
            read_buffer_size: CAPTURE_BUFFER_SIZE,
            promiscuous: true,
            ..Default::default()
        };

        match datalink::channel(iface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => {
                tracing::info!(interface = %iface.name, "Opened datalink channel");
                Ok(Self {
                    interface: iface.name.clone(),
                    rx,
                })
            }
            Ok(_) => Err(CaptureError::UnsupportedChannel(iface.name.clone())),
            Err(e) => Err(CaptureError::Open {
                interface: iface.name.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

impl FrameSource for PnetSource {
    fn next_event(&mut self) -> Result<SourceEvent, CaptureError> {
        match self.rx.next() {
            Ok(data) => Ok(SourceEvent::Frame(decode_ethernet_frame(data))),
            Err(e) if is_idle_error(&e) => Ok(SourceEvent::Idle),
            Err(e) => Err(CaptureError::Read(format!("{}: {e}", self.interface))),
        }
    }
}

fn is_idle_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
