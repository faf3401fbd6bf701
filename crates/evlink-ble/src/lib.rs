//! evlink-ble - Transport contract for the evlink diagnostic stack
//!
//! The link manager talks to the adapter exclusively through the
//! [`BleTransport`] trait; a platform-specific BLE implementation (CoreBluetooth,
//! BlueZ, ...) lives outside this workspace. The in-tree [`MockBleTransport`]
//! backs tests and the manager's mock mode.

pub mod device;
pub mod error;
pub mod mock;
pub mod transport;

pub use device::{DeviceRecord, ServiceInfo};
pub use error::TransportError;
pub use mock::{ConnectMode, MockBleTransport};
pub use transport::{BleTransport, LinkEvent};

/// GATT service UUID advertised by the common ELM327 BLE clones
pub const ELM_SERVICE_UUID: &str = "fff0";
/// Notify characteristic carrying adapter responses
pub const ELM_NOTIFY_UUID: &str = "fff1";
/// Write characteristic carrying commands to the adapter
pub const ELM_WRITE_UUID: &str = "fff2";
