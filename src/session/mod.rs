//! Management-plane session: control events in, notifications out.
//!
//! The event loop is generic over these two seams so it can run against the
//! live daemon connection ([`daemon`]) or against in-memory doubles.

pub mod daemon;
pub mod notification;

use crate::error::{ProtocolError, SendError};

pub use notification::{AttackType, InterfaceDirection, Notification, TrafficFlowEvent};

/// A control-plane request that was read and handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Keepalive,
    /// The daemon asked for the stored log time range. No replay log is kept.
    LogTimesRequested,
    /// The daemon asked for a replay of a time range. Not supported.
    ReplayRequested {
        start: Option<String>,
        stop: Option<String>,
    },
}

/// Readable control connection to the management daemon.
#[allow(async_fn_in_trait)]
pub trait ControlChannel {
    /// Wait for the next control message and dispatch it.
    ///
    /// Must be cancel safe: it is raced against timers in `tokio::select!`.
    async fn dispatch_ready(&mut self) -> Result<ControlEvent, ProtocolError>;

    /// Close the control connection.
    async fn release(self) -> Result<(), ProtocolError>;
}

/// Registered notification stream.
#[allow(async_fn_in_trait)]
pub trait NotificationSink {
    async fn send(&mut self, notification: &Notification) -> Result<(), SendError>;

    /// Close the worker connection and its stream registration.
    async fn close(self) -> Result<(), SendError>;
}
