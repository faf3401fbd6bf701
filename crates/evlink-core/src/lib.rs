//! evlink-core - Shared types for the evlink diagnostic stack
//!
//! This crate holds the pieces every other layer agrees on: the connection
//! status model broadcast by the link manager, the decoded metric value map
//! produced by the command catalog, the retry bookkeeping, and the clock
//! abstraction that lets tests drive time deterministically.

pub mod clock;
pub mod status;
pub mod values;

pub use clock::{Clock, SystemClock, TestClock};
pub use status::{ConnectionStatus, RetryState};
pub use values::ValueMap;
