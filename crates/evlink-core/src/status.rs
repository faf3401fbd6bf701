//! Connection status model and retry bookkeeping

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the adapter link
///
/// The link manager owns the single authoritative value and broadcasts a
/// copy on every transition. `Error` carries a human-readable reason so
/// subscribers (UI, background bridges) can surface it without access to
/// the originating error type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Scanning,
    Connecting,
    Probing,
    Connected,
    Error(String),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// Short label for log fields
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Scanning => "scanning",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Probing => "probing",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error(_) => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Error(reason) => write!(f, "error: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// Failure bookkeeping owned by the link manager
///
/// `consecutive_failures` counts whole scan-connect-probe attempts, not the
/// bounded per-attempt connect retries. It is reset on every successful
/// probe and exposed for diagnostics; it never terminates periodic retry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    /// Interval until the next reconnection attempt
    pub backoff: Duration,
}

impl RetryState {
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.consecutive_failures += 1;
        self.last_error = Some(reason.into());
    }

    /// Clear the failure counter after a successful probe
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip_labels() {
        assert_eq!(ConnectionStatus::Connected.label(), "connected");
        assert_eq!(
            ConnectionStatus::Error("adapter gone".into()).to_string(),
            "error: adapter gone"
        );
        assert!(!ConnectionStatus::Scanning.is_connected());
    }

    #[test]
    fn retry_state_counts_and_resets() {
        let mut retry = RetryState::default();
        retry.record_failure("scan failed");
        retry.record_failure("connect timed out");
        assert_eq!(retry.consecutive_failures, 2);
        assert_eq!(retry.last_error.as_deref(), Some("connect timed out"));

        retry.reset();
        assert_eq!(retry.consecutive_failures, 0);
        // last_error is kept for diagnostics after a recovery
        assert!(retry.last_error.is_some());
    }
}
