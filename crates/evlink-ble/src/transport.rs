//! Transport trait and link events

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::device::{DeviceRecord, ServiceInfo};
use crate::error::TransportError;

/// Unsolicited transport-side events
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The peer dropped the connection outside of an explicit disconnect
    Dropped { reason: String },
}

/// Platform-agnostic interface to the BLE adapter
///
/// The link manager owns the single transport handle; the command runner
/// borrows it only while connected. Notifications are a broadcast channel
/// because the adapter has exactly one response stream shared by every
/// exchange.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Whether the radio is currently powered
    async fn is_radio_on(&self) -> bool;

    /// Power the radio on, waiting for it to come up
    async fn power_on(&self) -> Result<(), TransportError>;

    /// Scan for peers matching any of `name_filters` for up to `timeout`
    async fn scan(
        &self,
        timeout: Duration,
        name_filters: &[String],
    ) -> Result<Vec<DeviceRecord>, TransportError>;

    /// Establish a connection to a scanned peer
    async fn connect(&self, device: &DeviceRecord) -> Result<(), TransportError>;

    /// Enumerate GATT services and their characteristics on a connected peer
    async fn discover_services(
        &self,
        device: &DeviceRecord,
    ) -> Result<Vec<ServiceInfo>, TransportError>;

    /// Write raw bytes to a characteristic
    async fn write(&self, characteristic: &str, data: &[u8]) -> Result<(), TransportError>;

    /// Subscribe to raw notification bytes from the adapter
    fn subscribe_notifications(&self) -> broadcast::Receiver<Vec<u8>>;

    /// Subscribe to link-level events (drops)
    fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent>;

    /// Tear the connection down; best effort, never fails
    async fn disconnect(&self, device: &DeviceRecord);
}
