//! Transport layer errors

use thiserror::Error;

/// Errors surfaced by a [`crate::BleTransport`] implementation
///
/// `ConnectTimeout` is raised by the caller racing a connect against its
/// clock rather than by the transport itself, but it lives here so the
/// whole radio-side taxonomy is one type.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The Bluetooth radio is powered off and could not be turned on
    #[error("Bluetooth radio is off")]
    RadioOff,

    /// Underlying scan failed (platform error, permissions, ...)
    #[error("Scan failed: {0}")]
    ScanFailed(String),

    /// Connect attempt was rejected or dropped by the peer
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Connect attempt did not complete within the allotted window
    #[error("Connect timed out")]
    ConnectTimeout,

    /// Required GATT service or characteristic missing after discovery
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Operation requires an established connection
    #[error("Not connected")]
    NotConnected,

    /// Characteristic write failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Notification channel closed underneath a pending read
    #[error("Notification channel closed")]
    ChannelClosed,
}
