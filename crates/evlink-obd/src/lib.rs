//! evlink-obd - OBD command engine for ELM327-style BLE adapters
//!
//! Three layers, bottom up:
//!
//! - [`isotp`] reassembles single/first/consecutive CAN frames (ISO-15765-2
//!   transport) into one flat diagnostic payload.
//! - [`command`] is the catalog: immutable [`CommandSpec`] rows pairing a
//!   mode/PID request with a pure decode function. Adding a metric means
//!   adding a row, never new control flow.
//! - [`elm`] drives the adapter: the one-time AT init sequence and the
//!   serialized request/response exchange with prompt detection and a
//!   clock-measured timeout.
//!
//! [`sim`] carries a deterministic adapter-plus-ECU responder used by tests
//! and by the link manager's mock mode.

pub mod command;
pub mod elm;
pub mod error;
pub mod isotp;
pub mod sim;

pub use command::{catalog, find_command, CommandSpec};
pub use elm::{ElmConfig, ElmRunner, FlowControlMode};
pub use error::{FrameParseError, ObdError};
pub use isotp::{RawFrame, Reassembler, Step};
pub use sim::SimulatedEcu;
