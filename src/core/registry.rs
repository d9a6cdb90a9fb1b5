//! Concurrent flow table shared by the capture thread and the event loop.
//!
//! Backed by a `DashMap`: every upsert runs inside a single entry guard, so a
//! reader never sees a half-updated record. Snapshots hand out clones and
//! release the shard locks before returning.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config;
use crate::core::flow::{FlowKey, FlowRecord};

/// Thread-safe flow registry. Keyed by [`FlowKey`].
pub struct FlowRegistry {
    flows: DashMap<FlowKey, FlowRecord>,
    timeout: Duration,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(config::INACTIVITY_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flows: DashMap::new(),
            timeout,
        }
    }

    /// Record one classified packet. Called from the capture thread.
    pub fn upsert(&self, key: FlowKey, source_port: u16, size: u64, now: Instant) {
        let timeout = self.timeout;
        self.flows
            .entry(key)
            .and_modify(|r| r.record_packet(source_port, size, now, timeout))
            .or_insert_with(|| FlowRecord::new(key, source_port, size, now));
    }

    /// Copy of a single flow, unless it has gone idle.
    pub fn get(&self, key: &FlowKey, now: Instant) -> Option<FlowRecord> {
        self.flows
            .get(key)
            .filter(|r| !r.is_idle(now, self.timeout))
            .map(|r| r.value().clone())
    }

    /// Copies of all live flows, oldest first.
    pub fn snapshot(&self, now: Instant) -> Vec<FlowRecord> {
        let mut records: Vec<FlowRecord> = self
            .flows
            .iter()
            .filter(|entry| !entry.value().is_idle(now, self.timeout))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| (a.first_seen, a.key()).cmp(&(b.first_seen, b.key())));
        records
    }

    /// Evict every idle flow. Returns the number of records removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut evicted = 0;
        self.flows.retain(|key, r| {
            if r.is_idle(now, self.timeout) {
                tracing::trace!(flow = %key, packets = r.packet_count, "flow expired");
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

impl Default for FlowRegistry {
    fn default() -> Self {
        Self::new()
    }
}
