//! Centralized runtime constants for nsf-monitor.
//!
//! All tunable intervals, timeouts, and endpoints are collected here so they can
//! be found and adjusted in a single place. The CLI exposes most of them as
//! overridable defaults.

/// A flow with no packet for this long is idle: hidden from lookups and snapshots,
/// evicted by the sweep, and restarted as a new window on its next packet (seconds).
pub const INACTIVITY_TIMEOUT_SECS: u64 = 5;

/// Interval between periodic traffic-flow emissions (seconds).
pub const EMISSION_INTERVAL_SECS: u64 = 5;

/// Bounded wait of the event loop; the expiry sweep runs on this tick (milliseconds).
pub const HOUSEKEEPING_INTERVAL_MS: u64 = 1000;

/// Upper bound for a single enrichment lookup (milliseconds).
pub const LOOKUP_TIMEOUT_MS: u64 = 500;

/// Upper bound for all enrichment lookups of one emission pass. Flows still
/// unresolved when it runs out are sent with their observed port (milliseconds).
pub const LOOKUP_BATCH_BUDGET_MS: u64 = 2000;

/// Enrichment lookups kept in flight at once during an emission pass.
pub const LOOKUP_CONCURRENCY: usize = 8;

/// Receive timeout of the capture socket, i.e. how often the capture thread
/// re-checks its shutdown flag (milliseconds).
pub const CAPTURE_RECV_TIMEOUT_MS: u64 = 500;

/// Back-off after a transient capture receive error (milliseconds).
pub const CAPTURE_ERROR_BACKOFF_MS: u64 = 100;

/// Largest frame the capture thread reads in one receive.
pub const CAPTURE_BUFFER_SIZE: usize = 65535;

/// Capacity of the operator/signal input channel.
pub const CONTROL_INPUT_CAPACITY: usize = 64;

/// Local management daemon endpoint.
pub const DEFAULT_DAEMON_ADDR: &str = "127.0.0.1:4565";

/// Name this process registers with the management daemon.
pub const DAEMON_NAME: &str = "notifier";

/// Notification stream the worker connection is bound to.
pub const DEFAULT_STREAM_NAME: &str = "I2NSF-Monitoring";

/// Interface sniffed for flows and reported in traffic notifications.
pub const DEFAULT_INTERFACE: &str = "ens3";

/// Session lookup service used for source enrichment.
pub const DEFAULT_LOOKUP_URL: &str = "http://10.0.0.58:5000/session/get";

/// Interface index and link-property flags carried by the operator `up` notification.
pub const LINK_UP_IF_INDEX: u32 = 1;
pub const LINK_UP_FLAGS: [u32; 2] = [2112, 32];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_housekeeping_is_shorter_than_timeout() {
        assert!(HOUSEKEEPING_INTERVAL_MS < INACTIVITY_TIMEOUT_SECS * 1000);
    }

    #[test]
    fn test_lookup_timeout_far_below_emission_interval() {
        assert!(LOOKUP_TIMEOUT_MS * 4 <= EMISSION_INTERVAL_SECS * 1000);
    }

    #[test]
    fn test_lookup_batch_fits_in_emission_interval() {
        const _: () = assert!(LOOKUP_TIMEOUT_MS <= LOOKUP_BATCH_BUDGET_MS);
        const _: () = assert!(LOOKUP_BATCH_BUDGET_MS < EMISSION_INTERVAL_SECS * 1000);
        const _: () = assert!(LOOKUP_CONCURRENCY > 0);
    }

    #[test]
    fn test_default_daemon_addr_parses() {
        let addr: std::net::SocketAddr = DEFAULT_DAEMON_ADDR.parse().unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 4565);
    }

    /// Compile-time sanity: all intervals are positive.
    /// Uses const assertions to avoid clippy::assertions_on_constants.
    #[test]
    fn test_all_intervals_positive() {
        const _: () = assert!(INACTIVITY_TIMEOUT_SECS > 0);
        const _: () = assert!(EMISSION_INTERVAL_SECS > 0);
        const _: () = assert!(HOUSEKEEPING_INTERVAL_MS > 0);
        const _: () = assert!(LOOKUP_TIMEOUT_MS > 0);
        const _: () = assert!(CAPTURE_RECV_TIMEOUT_MS > 0);
        const _: () = assert!(CONTROL_INPUT_CAPACITY > 0);
    }
}
