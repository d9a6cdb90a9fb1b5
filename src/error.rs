//! Error types, one enum per failure domain.
//!
//! Only [`ProtocolError`] can end the event loop, and only when it is not the
//! recoverable `External` kind. Enrichment and send failures are handled
//! inside the emission step; capture failures are fatal only at startup.

use std::io;

/// Failures of the packet capture source.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The capture socket could not be opened or bound to the interface.
    #[error("failed to open capture on {iface}: {source}")]
    Open {
        iface: String,
        #[source]
        source: io::Error,
    },

    /// A receive on an already open capture failed.
    #[error("capture receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] io::Error),

    /// Live capture is not available on this platform.
    #[error("live capture is not supported on this platform")]
    Unsupported,
}

/// Errors raised while reading or dispatching control-plane messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The daemon reported an external interruption. Logged and ignored.
    #[error("external interruption: {0}")]
    External(String),

    /// Any other error reported by the daemon.
    #[error("daemon error {errno}: {message}")]
    Daemon { errno: String, message: String },

    /// A control message could not be decoded.
    #[error("malformed control message: {0}")]
    Malformed(String),

    /// The daemon closed the connection.
    #[error("control connection closed by daemon")]
    Closed,

    #[error("control connection I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Returns the error kind as a short stable label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::External(_) => "External",
            ProtocolError::Daemon { .. } => "Daemon",
            ProtocolError::Malformed(_) => "Malformed",
            ProtocolError::Closed => "Closed",
            ProtocolError::Io(_) => "Io",
        }
    }

    /// Only an external interruption keeps the event loop alive.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::External(_))
    }
}

/// Failures of the session lookup used to enrich a flow.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("session lookup timed out")]
    Timeout,

    #[error("session lookup request failed: {0}")]
    Transport(String),

    #[error("session lookup returned HTTP {0}")]
    Status(u16),

    #[error("session lookup returned an unusable body: {0}")]
    Malformed(String),
}

impl EnrichmentError {
    pub fn kind(&self) -> &'static str {
        match self {
            EnrichmentError::Timeout => "Timeout",
            EnrichmentError::Transport(_) => "Transport",
            EnrichmentError::Status(_) => "Status",
            EnrichmentError::Malformed(_) => "Malformed",
        }
    }
}

impl From<reqwest::Error> for EnrichmentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EnrichmentError::Timeout
        } else if let Some(status) = err.status() {
            EnrichmentError::Status(status.as_u16())
        } else if err.is_decode() {
            EnrichmentError::Malformed(err.to_string())
        } else {
            EnrichmentError::Transport(err.to_string())
        }
    }
}

/// Failure to deliver a notification on the worker connection.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write notification: {0}")]
    Io(#[from] io::Error),

    #[error("notification session is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_external_protocol_error_is_recoverable() {
        assert!(ProtocolError::External("interrupted".into()).is_recoverable());
        assert!(!ProtocolError::Closed.is_recoverable());
        assert!(!ProtocolError::Malformed("x".into()).is_recoverable());
        assert!(!ProtocolError::Daemon {
            errno: "badstate".into(),
            message: "nope".into()
        }
        .is_recoverable());
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(!ProtocolError::from(io_err).is_recoverable());
    }

    #[test]
    fn test_protocol_error_kind_returns_variant_name() {
        assert_eq!(ProtocolError::External("e".into()).kind(), "External");
        assert_eq!(ProtocolError::Closed.kind(), "Closed");
        assert_eq!(ProtocolError::Malformed("m".into()).kind(), "Malformed");
    }

    #[test]
    fn test_daemon_error_display_includes_errno() {
        let err = ProtocolError::Daemon {
            errno: "access-denied".into(),
            message: "stream not allowed".into(),
        };
        assert_eq!(err.to_string(), "daemon error access-denied: stream not allowed");
    }

    #[test]
    fn test_enrichment_error_kind() {
        assert_eq!(EnrichmentError::Timeout.kind(), "Timeout");
        assert_eq!(EnrichmentError::Status(502).kind(), "Status");
        assert!(EnrichmentError::Status(502).to_string().contains("502"));
    }

    #[test]
    fn test_capture_open_error_names_interface() {
        let err = CaptureError::Open {
            iface: "ens3".into(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "operation not permitted"),
        };
        let text = err.to_string();
        assert!(text.contains("ens3"));
        assert!(text.contains("operation not permitted"));
    }
}
