//! Frame capture and ingestion.
//!
//! A [`FrameSource`] yields decoded frame descriptors; the ingestion loop turns
//! each one into a single [`DeviceRegistry::attribute`] call. The loop runs on a
//! dedicated OS thread owned by [`CaptureEngine`] because capture reads block.
//!
//! - Linux/macOS/Windows: pnet datalink channel (`pnet_backend`)

pub mod pnet_backend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::Packet;
use tokio::sync::watch;

use crate::core::devices::DeviceRegistry;
use crate::error::CaptureError;

/// Addressing extracted from one captured frame. Missing layers are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub link_src: Option<String>,
    pub link_dst: Option<String>,
    pub net_src: Option<String>,
    pub net_dst: Option<String>,
    /// Bytes on the wire as captured.
    pub length: u64,
}

impl FrameDescriptor {
    /// Link-layer-only frame, as produced for non-IP traffic.
    pub fn link(src: impl Into<String>, dst: impl Into<String>, length: u64) -> Self {
        Self {
            link_src: Some(src.into()),
            link_dst: Some(dst.into()),
            length,
            ..Default::default()
        }
    }

    /// Attach network-layer addresses.
    pub fn with_net(mut self, src: impl Into<String>, dst: impl Into<String>) -> Self {
        self.net_src = Some(src.into());
        self.net_dst = Some(dst.into());
        self
    }
}

/// What a source produced on one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Frame(FrameDescriptor),
    /// Nothing arrived within the read timeout; lets the loop notice a stop request.
    Idle,
    /// The sequence ended and will not restart.
    Exhausted,
}

/// A lazy, non-restartable sequence of captured frames.
pub trait FrameSource: Send {
    /// Poll the next event. An `Err` is fatal to ingestion.
    fn next_event(&mut self) -> Result<SourceEvent, CaptureError>;
}

/// Frame source backed by any iterator. Exhausted when the iterator ends.
pub struct IterSource<I> {
    frames: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = FrameDescriptor> + Send,
{
    pub fn new(frames: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }
}

impl<I> FrameSource for IterSource<I>
where
    I: Iterator<Item = FrameDescriptor> + Send,
{
    fn next_event(&mut self) -> Result<SourceEvent, CaptureError> {
        Ok(self
            .frames
            .next()
            .map_or(SourceEvent::Exhausted, SourceEvent::Frame))
    }
}

/// Decode an Ethernet II frame. Never fails: whatever layers parse are filled in.
pub fn decode_ethernet_frame(data: &[u8]) -> FrameDescriptor {
    let length = data.len() as u64;
    let Some(eth) = EthernetPacket::new(data) else {
        return FrameDescriptor {
            length,
            ..Default::default()
        };
    };

    let mut frame = FrameDescriptor::link(
        eth.get_source().to_string(),
        eth.get_destination().to_string(),
        length,
    );

    match eth.get_ethertype() {
        EtherTypes::Ipv4 => {
            if let Some(ip) = Ipv4Packet::new(eth.payload()) {
                frame = frame.with_net(ip.get_source().to_string(), ip.get_destination().to_string());
            }
        }
        EtherTypes::Ipv6 => {
            if let Some(ip) = Ipv6Packet::new(eth.payload()) {
                frame = frame.with_net(ip.get_source().to_string(), ip.get_destination().to_string());
            }
        }
        _ => {}
    }
    frame
}

/// Credit one frame to the registry. Returns false when the frame carries no link addressing.
pub fn apply_frame(devices: &DeviceRegistry, frame: &FrameDescriptor) -> bool {
    if frame.link_src.is_none() && frame.link_dst.is_none() {
        return false;
    }
    devices.attribute(
        frame.link_src.as_deref().unwrap_or_default(),
        frame.net_src.as_deref().unwrap_or_default(),
        frame.link_dst.as_deref().unwrap_or_default(),
        frame.net_dst.as_deref().unwrap_or_default(),
        frame.length,
    );
    true
}

/// How an ingestion run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A stop was requested.
    Stopped { frames: u64 },
    /// The source ran out of frames.
    Exhausted { frames: u64 },
}

/// Pull frames from `source` into `devices` until stopped, exhausted or failed.
pub fn ingest<S>(
    source: &mut S,
    devices: &DeviceRegistry,
    shutdown: &AtomicBool,
) -> Result<IngestOutcome, CaptureError>
where
    S: FrameSource + ?Sized,
{
    let mut frames = 0u64;
    while !shutdown.load(Ordering::Relaxed) {
        match source.next_event()? {
            SourceEvent::Frame(frame) => {
                if apply_frame(devices, &frame) {
                    frames += 1;
                }
            }
            SourceEvent::Idle => {}
            SourceEvent::Exhausted => return Ok(IngestOutcome::Exhausted { frames }),
        }
    }
    Ok(IngestOutcome::Stopped { frames })
}

/// Lifecycle of the ingestion thread as seen by the rest of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    Running,
    /// Stopped on request.
    Stopped,
    /// The capture source ended.
    Exhausted,
    /// The capture source failed.
    Failed(String),
}

impl CaptureState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CaptureState::Running)
    }

    /// Terminal states the process did not ask for.
    pub fn is_abnormal(&self) -> bool {
        matches!(self, CaptureState::Exhausted | CaptureState::Failed(_))
    }
}

/// Manages a background ingestion thread.
/// Implements Drop to request a stop on panic/exit.
pub struct CaptureEngine {
    shutdown: Arc<AtomicBool>,
    state: watch::Receiver<CaptureState>,
    capture_thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureEngine {
    /// Start ingesting from `source` into `devices` on a new thread.
    pub fn start(
        mut source: Box<dyn FrameSource>,
        devices: Arc<DeviceRegistry>,
    ) -> anyhow::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let (state_tx, state_rx) = watch::channel(CaptureState::Running);

        let thread = std::thread::Builder::new()
            .name("frame-ingest".into())
            .spawn(move || {
                let state = match ingest(source.as_mut(), &devices, &shutdown_clone) {
                    Ok(IngestOutcome::Stopped { frames }) => {
                        tracing::info!(frames, "Capture stopped");
                        CaptureState::Stopped
                    }
                    Ok(IngestOutcome::Exhausted { frames }) => {
                        tracing::warn!(frames, "Capture source exhausted");
                        CaptureState::Exhausted
                    }
                    Err(e) => {
                        tracing::error!("Capture loop exited: {e}");
                        CaptureState::Failed(e.to_string())
                    }
                };
                state_tx.send_replace(state);
            })?;

        tracing::info!("CaptureEngine started");
        Ok(Self {
            shutdown,
            state: state_rx,
            capture_thread: Some(thread),
        })
    }

    /// Watch the ingestion state; changes once, to a terminal state.
    pub fn state(&self) -> watch::Receiver<CaptureState> {
        self.state.clone()
    }

    /// Ask the thread to stop after the current read returns.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stop and wait for the thread to finish.
    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.capture_thread.take() {
            if thread.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if self.capture_thread.is_some() {
            tracing::debug!("CaptureEngine dropped, releasing capture resources");
        }
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::BROADCAST_MAC;

    const MAC_A: [u8; 6] = [0xaa, 0x00, 0x00, 0x00, 0x00, 0x01];
    const MAC_B: [u8; 6] = [0xbb, 0x00, 0x00, 0x00, 0x00, 0x02];

    /// Build an Ethernet II header followed by `payload`.
    fn build_ethernet_frame(src: [u8; 6], dst: [u8; 6], ethertype: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(14 + payload.len());
        frame.extend_from_slice(&dst);
        frame.extend_from_slice(&src);
        frame.extend_from_slice(&ethertype.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    /// Minimal 20-byte IPv4 header with the given addresses.
    fn build_ipv4_header(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut hdr = vec![0u8; 20];
        // Version 4, IHL 5 (20 bytes).
        hdr[0] = 0x45;
        hdr[2..4].copy_from_slice(&20u16.to_be_bytes());
        hdr[8] = 64;
        hdr[9] = 17;
        hdr[12..16].copy_from_slice(&src);
        hdr[16..20].copy_from_slice(&dst);
        hdr
    }

    /// Minimal 40-byte IPv6 header with ::1 -> ::2.
    fn build_ipv6_header() -> Vec<u8> {
        let mut hdr = vec![0u8; 40];
        hdr[0] = 0x60;
        hdr[6] = 59; // no next header
        hdr[7] = 64;
        hdr[23] = 1;
        hdr[39] = 2;
        hdr
    }

    #[test]
    fn test_decode_ipv4_frame() {
        let ip = build_ipv4_header([192, 168, 1, 10], [192, 168, 1, 1]);
        let data = build_ethernet_frame(MAC_A, MAC_B, 0x0800, &ip);
        let frame = decode_ethernet_frame(&data);

        assert_eq!(frame.link_src.as_deref(), Some("aa:00:00:00:00:01"));
        assert_eq!(frame.link_dst.as_deref(), Some("bb:00:00:00:00:02"));
        assert_eq!(frame.net_src.as_deref(), Some("192.168.1.10"));
        assert_eq!(frame.net_dst.as_deref(), Some("192.168.1.1"));
        assert_eq!(frame.length, 34);
    }

    #[test]
    fn test_decode_ipv6_frame() {
        let data = build_ethernet_frame(MAC_A, MAC_B, 0x86DD, &build_ipv6_header());
        let frame = decode_ethernet_frame(&data);
        assert_eq!(frame.net_src.as_deref(), Some("::1"));
        assert_eq!(frame.net_dst.as_deref(), Some("::2"));
    }

    #[test]
    fn test_decode_arp_frame_is_link_only() {
        let data = build_ethernet_frame(MAC_A, [0xff; 6], 0x0806, &[0u8; 28]);
        let frame = decode_ethernet_frame(&data);
        assert_eq!(frame.link_dst.as_deref(), Some(BROADCAST_MAC));
        assert!(frame.net_src.is_none() && frame.net_dst.is_none());
        assert_eq!(frame.length, 42);
    }

    #[test]
    fn test_decode_truncated_ip_keeps_link_layer() {
        // IPv4 ethertype but only 8 bytes of header.
        let data = build_ethernet_frame(MAC_A, MAC_B, 0x0800, &[0x45; 8]);
        let frame = decode_ethernet_frame(&data);
        assert!(frame.link_src.is_some());
        assert!(frame.net_src.is_none());
    }

    #[test]
    fn test_decode_runt_frame_has_no_link_layer() {
        let frame = decode_ethernet_frame(&[0u8; 10]);
        assert_eq!(frame, FrameDescriptor { length: 10, ..Default::default() });
        assert!(decode_ethernet_frame(&[]).link_src.is_none());
    }

    #[test]
    fn test_apply_frame_skips_frames_without_link_layer() {
        let devices = DeviceRegistry::new();
        let runt = FrameDescriptor { length: 60, ..Default::default() };
        assert!(!apply_frame(&devices, &runt));
        assert!(devices.is_empty());
    }

    #[test]
    fn test_apply_frame_link_only_records_empty_address() {
        let devices = DeviceRegistry::new();
        let frame = FrameDescriptor::link("aa:00:00:00:00:01", "bb:00:00:00:00:02", 60);
        assert!(apply_frame(&devices, &frame));
        assert_eq!(devices.lookup("aa:00:00:00:00:01").unwrap().address, "");
        assert_eq!(devices.lookup("bb:00:00:00:00:02").unwrap().bytes_received, 60);
    }

    #[test]
    fn test_apply_frame_half_link_layer() {
        let devices = DeviceRegistry::new();
        let frame = FrameDescriptor {
            link_src: Some("aa:00:00:00:00:01".into()),
            net_src: Some("10.0.0.5".into()),
            length: 70,
            ..Default::default()
        };
        assert!(apply_frame(&devices, &frame));
        let record = devices.lookup("aa:00:00:00:00:01").unwrap();
        assert_eq!(record.bytes_sent, 70);
        assert_eq!(record.address, "10.0.0.5");
        assert_eq!(devices.len(), 1);
    }

    #[test]
    fn test_ingest_until_exhausted() {
        let devices = DeviceRegistry::new();
        let mut source = IterSource::new(vec![
            FrameDescriptor::link("aa", "bb", 64),
            FrameDescriptor::link("bb", "aa", 1500),
            FrameDescriptor::link("aa", BROADCAST_MAC, 128),
            FrameDescriptor { length: 5, ..Default::default() },
        ]);
        let shutdown = AtomicBool::new(false);

        let outcome = ingest(&mut source, &devices, &shutdown).unwrap();

        assert_eq!(outcome, IngestOutcome::Exhausted { frames: 3 });
        assert_eq!(devices.lookup("aa").unwrap().bytes_sent, 192);
        assert_eq!(devices.lookup("aa").unwrap().bytes_received, 1500);
        assert_eq!(devices.lookup("bb").unwrap().bytes_received, 64);
        assert!(devices.lookup(BROADCAST_MAC).is_none());
    }

    struct IdleSource;

    impl FrameSource for IdleSource {
        fn next_event(&mut self) -> Result<SourceEvent, CaptureError> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(SourceEvent::Idle)
        }
    }

    struct BrokenSource {
        good_frames: u32,
    }

    impl FrameSource for BrokenSource {
        fn next_event(&mut self) -> Result<SourceEvent, CaptureError> {
            if self.good_frames == 0 {
                return Err(CaptureError::Read("interface went down".into()));
            }
            self.good_frames -= 1;
            Ok(SourceEvent::Frame(FrameDescriptor::link("aa", "bb", 10)))
        }
    }

    #[test]
    fn test_ingest_honours_stop_flag() {
        let devices = DeviceRegistry::new();
        let shutdown = AtomicBool::new(true);
        let outcome = ingest(&mut IdleSource, &devices, &shutdown).unwrap();
        assert_eq!(outcome, IngestOutcome::Stopped { frames: 0 });
    }

    #[test]
    fn test_ingest_propagates_source_failure() {
        let devices = DeviceRegistry::new();
        let shutdown = AtomicBool::new(false);
        let err = ingest(&mut BrokenSource { good_frames: 2 }, &devices, &shutdown).unwrap_err();
        assert_eq!(err, CaptureError::Read("interface went down".into()));
        // Frames before the failure were still attributed.
        assert_eq!(devices.lookup("aa").unwrap().packets_sent, 2);
    }

    #[tokio::test]
    async fn test_engine_reports_exhaustion() {
        let devices = Arc::new(DeviceRegistry::new());
        let source = IterSource::new(vec![FrameDescriptor::link("aa", "bb", 64)]);
        let engine = CaptureEngine::start(Box::new(source), Arc::clone(&devices)).unwrap();

        let mut state = engine.state();
        let terminal = state.wait_for(|s| s.is_terminal()).await.unwrap().clone();
        assert_eq!(terminal, CaptureState::Exhausted);
        assert!(terminal.is_abnormal());
        assert_eq!(devices.lookup("aa").unwrap().bytes_sent, 64);
        engine.join();
    }

    #[tokio::test]
    async fn test_engine_reports_failure() {
        let devices = Arc::new(DeviceRegistry::new());
        let engine =
            CaptureEngine::start(Box::new(BrokenSource { good_frames: 0 }), devices).unwrap();

        let mut state = engine.state();
        let terminal = state.wait_for(|s| s.is_terminal()).await.unwrap().clone();
        assert!(matches!(terminal, CaptureState::Failed(ref msg) if msg.contains("went down")));
        engine.join();
    }

    #[tokio::test]
    async fn test_engine_stop_is_not_abnormal() {
        let devices = Arc::new(DeviceRegistry::new());
        let engine = CaptureEngine::start(Box::new(IdleSource), devices).unwrap();
        let mut state = engine.state();

        engine.stop();
        let terminal = state.wait_for(|s| s.is_terminal()).await.unwrap().clone();
        assert_eq!(terminal, CaptureState::Stopped);
        assert!(!terminal.is_abnormal());
        engine.join();
    }
}
