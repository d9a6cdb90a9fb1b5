//! Core logic: flow model, flow registry, window metrics.
//!
//! - [`FlowKey`] / [`FlowRecord`]: identity and state of one flow
//! - [`FlowRegistry`]: concurrent flow table with snapshot and expiry sweep
//! - [`metrics`]: rate and throughput over a measurement window

pub mod flow;
pub mod metrics;
pub mod registry;

pub use flow::{FlowKey, FlowRecord, Protocol};
pub use metrics::FlowMetrics;
pub use registry::FlowRegistry;
