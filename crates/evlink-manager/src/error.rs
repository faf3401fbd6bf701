//! Link manager errors

use evlink_ble::TransportError;
use evlink_obd::ObdError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Obd(#[from] ObdError),

    /// Scan finished without a device matching the configured name filters
    #[error("No matching adapter found")]
    NoAdapterFound,

    /// Per-attempt connect budget spent; the periodic loop will try again
    #[error("Connection failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: TransportError },

    /// Adapter accepted the connection but failed init or the first
    /// catalog command
    #[error("Probe failed: {0}")]
    ProbeFailed(#[source] ObdError),

    /// Adapter connected but its GATT layout is missing the expected
    /// service or characteristics
    #[error("Adapter is missing service {service} or its characteristics")]
    UnsupportedAdapter { service: String },

    #[error("Not connected to an adapter")]
    NotConnected,

    /// Mock mode toggled while a live session exists
    #[error("Cannot switch transport while a session is active")]
    MockModeConflict,

    #[error("Manager is already running")]
    AlreadyRunning,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}
