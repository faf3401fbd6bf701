//! OBD engine errors

use evlink_ble::TransportError;
use thiserror::Error;

/// Structured parse failures from the frame reassembler
///
/// Every variant is terminal for the exchange in progress: the reassembler
/// never hands back a partial payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameParseError {
    /// PCI high nibble outside {0, 1, 2}
    #[error("unknown PCI type nibble 0x{0:X}")]
    UnknownPci(u8),

    /// Consecutive frame arrived with no first frame open
    #[error("consecutive frame with no first frame")]
    UnexpectedConsecutive,

    /// Single or first frame arrived while a reassembly was in progress
    #[error("frame with PCI 0x{0:02X} interrupted an open reassembly")]
    UnexpectedStart(u8),

    /// Consecutive frame sequence index skipped a value
    #[error("sequence gap: expected index {expected}, got {got}")]
    SequenceGap { expected: u8, got: u8 },

    /// More frame data than the first frame declared
    #[error("data past the declared total of {declared} bytes")]
    LengthOverrun { declared: usize },

    /// Frame shorter than header + PCI (or than its own length field)
    #[error("frame too short: {0} bytes")]
    TruncatedFrame(usize),

    /// Adapter line was not ASCII hex
    #[error("line is not valid hex: {0:?}")]
    InvalidHex(String),
}

/// Errors from adapter initialization and command execution
#[derive(Debug, Error)]
pub enum ObdError {
    /// One of the AT init steps was not acknowledged
    #[error("Adapter init failed at {step}: {reason}")]
    AdapterInit { step: String, reason: String },

    /// A command was issued before the init sequence ran
    #[error("Adapter not initialized")]
    NotInitialized,

    #[error(transparent)]
    FrameParse(#[from] FrameParseError),

    /// No prompt marker within the response window; the caller decides
    /// whether to retry; a stuck exchange is never repeated automatically
    #[error("Command timed out waiting for adapter prompt")]
    CommandTimeout,

    /// Adapter answered `NO DATA` (ECU silent for this PID)
    #[error("Adapter reported NO DATA for {0}")]
    NoData(String),

    /// Adapter-level fault line (`CAN ERROR`, `BUS INIT: ERROR`, `?`, ...)
    #[error("Adapter fault: {0}")]
    AdapterFault(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Response reassembled but did not match the command's expectations
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
