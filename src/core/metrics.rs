//! Rate and throughput over a measurement window.

use std::time::{Duration, Instant};

/// Derived metrics of one measurement window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlowMetrics {
    pub duration: Duration,
    /// Packets per second.
    pub rate: f64,
    /// Bytes per second.
    pub throughput: f64,
}

impl FlowMetrics {
    /// Whole seconds of the window, saturating at `u32::MAX`.
    pub fn measurement_secs(&self) -> u32 {
        u32::try_from(self.duration.as_secs()).unwrap_or(u32::MAX)
    }

    /// Rate truncated to whole packets per second.
    pub fn rate_per_sec(&self) -> u64 {
        self.rate as u64
    }

    /// Throughput truncated to whole bytes per second.
    pub fn throughput_per_sec(&self) -> u64 {
        self.throughput as u64
    }
}

/// Metrics for the window `window_start..last_seen`.
pub fn compute(window_start: Instant, last_seen: Instant, packet_count: u64, byte_total: u64) -> FlowMetrics {
    compute_over(
        last_seen.saturating_duration_since(window_start),
        packet_count,
        byte_total,
    )
}

/// Metrics for a window of the given length. Rate and throughput are zero for
/// an empty window.
pub fn compute_over(duration: Duration, packet_count: u64, byte_total: u64) -> FlowMetrics {
    if duration.is_zero() {
        return FlowMetrics::default();
    }
    let secs = duration.as_secs_f64();
    FlowMetrics {
        duration,
        rate: packet_count as f64 / secs,
        throughput: byte_total as f64 / secs,
    }
}
