//! Flow identity and the per-flow record kept by the registry.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::metrics::{self, FlowMetrics};

/// IP protocols that are tracked as flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Icmp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Icmp => "icmp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identity of a tracked flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub source_address: Ipv4Addr,
    pub destination_address: Ipv4Addr,
    pub protocol: Protocol,
    pub destination_port: u16,
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}:{} proto:{}",
            self.source_address, self.destination_address, self.destination_port, self.protocol
        )
    }
}

/// State of one flow. Lives inside the registry; callers only ever see clones.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    pub source_address: Ipv4Addr,
    pub destination_address: Ipv4Addr,
    pub protocol: Protocol,
    pub source_port: u16,
    pub destination_port: u16,
    /// When the flow was first observed. Survives window resets.
    pub first_seen: Instant,
    /// Start of the current measurement window.
    pub window_start: Instant,
    pub last_seen: Instant,
    pub packet_count: u64,
    pub byte_total: u64,
    pub window_duration: Duration,
    /// Packets per second over the current window.
    pub arrival_rate: f64,
    /// Bytes per second over the current window.
    pub arrival_throughput: f64,
}

impl FlowRecord {
    /// Record for the first packet of a flow.
    pub fn new(key: FlowKey, source_port: u16, size: u64, now: Instant) -> Self {
        Self {
            source_address: key.source_address,
            destination_address: key.destination_address,
            protocol: key.protocol,
            source_port,
            destination_port: key.destination_port,
            first_seen: now,
            window_start: now,
            last_seen: now,
            packet_count: 1,
            byte_total: size,
            window_duration: Duration::ZERO,
            arrival_rate: 0.0,
            arrival_throughput: 0.0,
        }
    }

    pub fn key(&self) -> FlowKey {
        FlowKey {
            source_address: self.source_address,
            destination_address: self.destination_address,
            protocol: self.protocol,
            destination_port: self.destination_port,
        }
    }

    /// True once no packet has been seen for at least `timeout`.
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) >= timeout
    }

    /// Account one more packet. A packet arriving after the record went idle
    /// starts a new measurement window instead of extending the old one.
    pub fn record_packet(&mut self, source_port: u16, size: u64, now: Instant, timeout: Duration) {
        if self.is_idle(now, timeout) {
            self.source_port = source_port;
            self.window_start = now.max(self.last_seen);
            self.last_seen = self.window_start;
            self.packet_count = 1;
            self.byte_total = size;
        } else {
            self.last_seen = self.last_seen.max(now);
            self.packet_count = self.packet_count.saturating_add(1);
            self.byte_total = self.byte_total.saturating_add(size);
        }
        self.refresh_metrics();
    }

    /// Metrics of the current window as last computed.
    pub fn metrics(&self) -> FlowMetrics {
        FlowMetrics {
            duration: self.window_duration,
            rate: self.arrival_rate,
            throughput: self.arrival_throughput,
        }
    }

    fn refresh_metrics(&mut self) {
        let m = metrics::compute(
            self.window_start,
            self.last_seen,
            self.packet_count,
            self.byte_total,
        );
        self.window_duration = m.duration;
        self.arrival_rate = m.rate;
        self.arrival_throughput = m.throughput;
    }
}
