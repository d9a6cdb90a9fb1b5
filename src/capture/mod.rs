//! Packet capture: frame source, classification, and the background capture thread.
//!
//! - Linux: `AF_PACKET` raw socket (`linux_backend`)
//! - Other platforms: live capture is unavailable; tests drive the engine with
//!   an in-memory [`PacketSource`].

pub mod classifier;

#[cfg(target_os = "linux")]
pub mod linux_backend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config;
use crate::core::registry::FlowRegistry;
use crate::error::CaptureError;

use classifier::{classify, decode_frame, DecodedPacket, Transport};

/// Sizes of one received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Bytes written into the receive buffer.
    pub captured: usize,
    /// Length of the frame on the wire.
    pub wire_len: usize,
}

/// Blocking frame source read by the capture thread.
///
/// `next_frame` must return within a bounded time (`Ok(None)` on timeout) so
/// the thread can observe its shutdown flag.
pub trait PacketSource: Send + 'static {
    fn next_frame(&mut self, buf: &mut [u8]) -> Result<Option<FrameInfo>, CaptureError>;
}

/// Userspace capture filter applied before classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureFilter {
    /// TCP traffic to or from this port is dropped (the enrichment service's own traffic).
    pub excluded_port: Option<u16>,
}

impl CaptureFilter {
    pub fn excluding_port(port: u16) -> Self {
        Self {
            excluded_port: Some(port),
        }
    }

    pub fn admits(&self, packet: &DecodedPacket<'_>) -> bool {
        match (self.excluded_port, packet.transport) {
            (
                Some(port),
                Transport::Tcp {
                    source_port,
                    destination_port,
                },
            ) => source_port != port && destination_port != port,
            _ => true,
        }
    }
}

/// Manages the background capture thread.
/// Implements Drop so the thread is told to stop even if `stop` is never called.
pub struct CaptureEngine {
    shutdown: Arc<AtomicBool>,
    capture_thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureEngine {
    /// Start the capture thread over an arbitrary frame source.
    pub fn start<S: PacketSource>(
        source: S,
        registry: Arc<FlowRegistry>,
        filter: CaptureFilter,
    ) -> Result<Self, CaptureError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        let thread = std::thread::Builder::new()
            .name("flow-capture".into())
            .spawn(move || run_capture_loop(source, registry, filter, shutdown_clone))
            .map_err(CaptureError::Spawn)?;

        tracing::info!("CaptureEngine started");
        Ok(Self {
            shutdown,
            capture_thread: Some(thread),
        })
    }

    /// Start capturing live traffic on `iface`.
    #[cfg(target_os = "linux")]
    pub fn start_live(
        iface: &str,
        registry: Arc<FlowRegistry>,
        filter: CaptureFilter,
    ) -> Result<Self, CaptureError> {
        let source = linux_backend::RawSocketSource::open(
            iface,
            Duration::from_millis(config::CAPTURE_RECV_TIMEOUT_MS),
        )?;
        tracing::info!("Capturing on {iface} with filter {filter:?}");
        Self::start(source, registry, filter)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn start_live(
        _iface: &str,
        _registry: Arc<FlowRegistry>,
        _filter: CaptureFilter,
    ) -> Result<Self, CaptureError> {
        Err(CaptureError::Unsupported)
    }

    /// Signal the capture thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.capture_thread.take() {
            if handle.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        }
        tracing::info!("CaptureEngine stopped");
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if self.capture_thread.is_some() {
            tracing::warn!("CaptureEngine dropped without stop; signalling capture thread");
        }
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

fn run_capture_loop<S: PacketSource>(
    mut source: S,
    registry: Arc<FlowRegistry>,
    filter: CaptureFilter,
    shutdown: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; config::CAPTURE_BUFFER_SIZE];

    while !shutdown.load(Ordering::Relaxed) {
        match source.next_frame(&mut buf) {
            Ok(Some(frame)) => {
                let captured = frame.captured.min(buf.len());
                process_frame(&registry, &filter, &buf[..captured], frame.wire_len);
            }
            Ok(None) => {}
            Err(e) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                tracing::warn!("capture receive error: {e}");
                std::thread::sleep(Duration::from_millis(config::CAPTURE_ERROR_BACKOFF_MS));
            }
        }
    }

    tracing::debug!("capture loop exited");
}

/// Decode, filter, and classify one frame; record it when flow-relevant.
/// Returns whether the registry was updated.
pub fn process_frame(
    registry: &FlowRegistry,
    filter: &CaptureFilter,
    frame: &[u8],
    wire_len: usize,
) -> bool {
    let Some(packet) = decode_frame(frame, wire_len) else {
        return false;
    };
    if !filter.admits(&packet) {
        return false;
    }
    let Some(observed) = classify(&packet) else {
        return false;
    };

    tracing::trace!(flow = %observed.key, size = observed.size, "flow packet");
    registry.upsert(observed.key, observed.source_port, observed.size, Instant::now());
    true
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicUsize;

    use super::classifier::tests::tcp_frame;
    use super::*;
    use crate::core::flow::{FlowKey, Protocol};

    const CLIENT: [u8; 4] = [192, 168, 1, 20];
    const SERVER: [u8; 4] = [10, 0, 0, 1];

    /// Replays queued frames, then blocks for `idle` per call like a socket
    /// with a receive timeout.
    pub(crate) struct ScriptedSource {
        pub frames: VecDeque<Vec<u8>>,
        pub idle: Duration,
        pub reads: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        pub(crate) fn new(frames: Vec<Vec<u8>>, idle: Duration) -> Self {
            Self {
                frames: frames.into(),
                idle,
                reads: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl PacketSource for ScriptedSource {
        fn next_frame(&mut self, buf: &mut [u8]) -> Result<Option<FrameInfo>, CaptureError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            match self.frames.pop_front() {
                Some(frame) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(Some(FrameInfo {
                        captured: frame.len(),
                        wire_len: frame.len(),
                    }))
                }
                None => {
                    std::thread::sleep(self.idle);
                    Ok(None)
                }
            }
        }
    }

    fn flow_key(dport: u16) -> FlowKey {
        FlowKey {
            source_address: Ipv4Addr::from(CLIENT),
            destination_address: Ipv4Addr::from(SERVER),
            protocol: Protocol::Tcp,
            destination_port: dport,
        }
    }

    #[test]
    fn test_process_frame_records_http_request() {
        let registry = FlowRegistry::new();
        let frame = tcp_frame(CLIENT, SERVER, 40000, 80, b"GET / HTTP/1.1\r\n");
        assert!(process_frame(&registry, &CaptureFilter::default(), &frame, frame.len()));
        let r = registry.get(&flow_key(80), Instant::now()).unwrap();
        assert_eq!(r.packet_count, 1);
        assert_eq!(r.byte_total, frame.len() as u64);
        assert_eq!(r.source_port, 40000);
    }

    #[test]
    fn test_process_frame_ignores_non_request() {
        let registry = FlowRegistry::new();
        let frame = tcp_frame(CLIENT, SERVER, 40000, 80, b"\x00\x01binary");
        assert!(!process_frame(&registry, &CaptureFilter::default(), &frame, frame.len()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_filter_excludes_lookup_service_traffic() {
        let registry = FlowRegistry::new();
        let filter = CaptureFilter::excluding_port(5000);
        let to_service = tcp_frame(CLIENT, SERVER, 40000, 5000, b"GET /session/get HTTP/1.1\r\n");
        let from_service = tcp_frame(SERVER, CLIENT, 5000, 40000, b"GET /echo HTTP/1.1\r\n");
        assert!(!process_frame(&registry, &filter, &to_service, to_service.len()));
        assert!(!process_frame(&registry, &filter, &from_service, from_service.len()));
        assert!(registry.is_empty());

        let other = tcp_frame(CLIENT, SERVER, 40000, 80, b"GET / HTTP/1.1\r\n");
        assert!(process_frame(&registry, &filter, &other, other.len()));
    }

    #[test]
    fn test_engine_feeds_registry_and_stops() {
        let registry = Arc::new(FlowRegistry::new());
        let frames = vec![
            tcp_frame(CLIENT, SERVER, 40000, 80, b"GET /a HTTP/1.1\r\n"),
            tcp_frame(CLIENT, SERVER, 40001, 80, b"POST /b HTTP/1.1\r\n"),
            tcp_frame(CLIENT, SERVER, 40002, 443, b"\x16\x03\x01"),
        ];
        let source = ScriptedSource::new(frames, Duration::from_millis(5));
        let reads = Arc::clone(&source.reads);
        let engine =
            CaptureEngine::start(source, Arc::clone(&registry), CaptureFilter::default()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while reads.load(Ordering::SeqCst) < 4 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        engine.stop();

        let r = registry.get(&flow_key(80), Instant::now()).unwrap();
        assert_eq!(r.packet_count, 2);
        assert_eq!(registry.len(), 1);
    }

    struct FailingSource;

    impl PacketSource for FailingSource {
        fn next_frame(&mut self, _buf: &mut [u8]) -> Result<Option<FrameInfo>, CaptureError> {
            Err(CaptureError::Receive(std::io::Error::new(
                std::io::ErrorKind::Other,
                "interface went down",
            )))
        }
    }

    #[test]
    fn test_receive_errors_do_not_kill_the_thread() {
        let registry = Arc::new(FlowRegistry::new());
        let engine = CaptureEngine::start(FailingSource, registry, CaptureFilter::default()).unwrap();
        std::thread::sleep(Duration::from_millis(250));
        engine.stop();
    }
}
