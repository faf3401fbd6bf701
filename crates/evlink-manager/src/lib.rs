//! evlink-manager - Connection lifecycle for ELM327 BLE adapters
//!
//! Wires the transport, the OBD engine and the clock together: the
//! [`LinkManager`] scans for an adapter, connects with a bounded retry
//! budget, probes the ECU through the command catalog and then keeps the
//! link alive from a periodic reconnection loop. Consumers watch the
//! broadcast status stream and issue catalog commands over the live
//! session.

pub mod config;
pub mod error;
pub mod manager;

pub use config::{ConfigError, LinkConfig};
pub use error::LinkError;
pub use manager::LinkManager;
