//! Mock transport for tests and mock mode
//!
//! Plays the role of both the platform BLE stack and the remote adapter:
//! scripted devices and services stand in for scan/discovery results, and a
//! pluggable responder closure answers characteristic writes with
//! notification chunks, so the full command path can run without hardware.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::device::{DeviceRecord, ServiceInfo};
use crate::error::TransportError;
use crate::transport::{BleTransport, LinkEvent};
use crate::{ELM_NOTIFY_UUID, ELM_SERVICE_UUID, ELM_WRITE_UUID};

/// Maps one written command line to the notification lines it produces.
/// The trailing `>` prompt is appended by the transport.
pub type Responder = Box<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// How the next connect attempts should behave
#[derive(Debug, Clone, Default)]
pub enum ConnectMode {
    /// Accept immediately
    #[default]
    Accept,
    /// Fail immediately with the given reason
    Reject(String),
    /// Never complete; the caller's timeout has to fire
    Hang,
}

/// Scriptable in-memory transport
pub struct MockBleTransport {
    radio_on: AtomicBool,
    power_on_fails: AtomicBool,
    connected: AtomicBool,
    scan_error: RwLock<Option<String>>,
    connect_mode: RwLock<ConnectMode>,
    devices: RwLock<Vec<DeviceRecord>>,
    services: RwLock<Vec<ServiceInfo>>,
    responder: RwLock<Option<Responder>>,
    scans: AtomicU32,
    connect_attempts: AtomicU32,
    connected_ids: RwLock<Vec<String>>,
    disconnects: AtomicU32,
    writes: RwLock<Vec<Vec<u8>>>,
    notify_tx: broadcast::Sender<Vec<u8>>,
    event_tx: broadcast::Sender<LinkEvent>,
}

impl MockBleTransport {
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(256);
        let (event_tx, _) = broadcast::channel(16);
        Self {
            radio_on: AtomicBool::new(true),
            power_on_fails: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            scan_error: RwLock::new(None),
            connect_mode: RwLock::new(ConnectMode::Accept),
            devices: RwLock::new(Vec::new()),
            services: RwLock::new(Vec::new()),
            responder: RwLock::new(None),
            scans: AtomicU32::new(0),
            connect_attempts: AtomicU32::new(0),
            connected_ids: RwLock::new(Vec::new()),
            disconnects: AtomicU32::new(0),
            writes: RwLock::new(Vec::new()),
            notify_tx,
            event_tx,
        }
    }

    /// A transport advertising one generic ELM327 clone with the usual
    /// fff0/fff1/fff2 GATT layout
    pub fn with_elm_defaults() -> Self {
        let mock = Self::new();
        mock.add_device(DeviceRecord {
            id: "AA:BB:CC:DD:EE:FF".into(),
            name: Some("OBDII".into()),
            rssi: -58,
            service_uuids: vec![ELM_SERVICE_UUID.into()],
            manufacturer_data: vec![],
        });
        mock.set_services(vec![ServiceInfo {
            uuid: ELM_SERVICE_UUID.into(),
            characteristics: vec![ELM_NOTIFY_UUID.into(), ELM_WRITE_UUID.into()],
        }]);
        mock
    }

    pub fn add_device(&self, device: DeviceRecord) {
        self.devices.write().push(device);
    }

    pub fn set_services(&self, services: Vec<ServiceInfo>) {
        *self.services.write() = services;
    }

    pub fn set_radio_on(&self, on: bool) {
        self.radio_on.store(on, Ordering::SeqCst);
    }

    /// Make `power_on` fail (radio stuck off)
    pub fn fail_power_on(&self, fail: bool) {
        self.power_on_fails.store(fail, Ordering::SeqCst);
    }

    pub fn set_scan_error(&self, reason: Option<String>) {
        *self.scan_error.write() = reason;
    }

    pub fn set_connect_mode(&self, mode: ConnectMode) {
        *self.connect_mode.write() = mode;
    }

    /// Install the closure answering written command lines
    pub fn set_responder(&self, responder: Responder) {
        *self.responder.write() = Some(responder);
    }

    /// Simulate the peer dropping the link
    pub fn drop_link(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.event_tx.send(LinkEvent::Dropped {
            reason: reason.to_string(),
        });
    }

    /// Push raw notification bytes, bypassing the responder
    pub fn inject_notification(&self, data: Vec<u8>) {
        let _ = self.notify_tx.send(data);
    }

    pub fn scan_count(&self) -> u32 {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Device ids of every accepted connect, in order
    pub fn connected_ids(&self) -> Vec<String> {
        self.connected_ids.read().clone()
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Every write so far, rendered as trimmed ASCII command lines
    pub fn written_commands(&self) -> Vec<String> {
        self.writes
            .read()
            .iter()
            .map(|w| String::from_utf8_lossy(w).trim().to_string())
            .collect()
    }
}

impl Default for MockBleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleTransport for MockBleTransport {
    async fn is_radio_on(&self) -> bool {
        self.radio_on.load(Ordering::SeqCst)
    }

    async fn power_on(&self) -> Result<(), TransportError> {
        if self.power_on_fails.load(Ordering::SeqCst) {
            return Err(TransportError::RadioOff);
        }
        self.radio_on.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn scan(
        &self,
        _timeout: Duration,
        name_filters: &[String],
    ) -> Result<Vec<DeviceRecord>, TransportError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if !self.radio_on.load(Ordering::SeqCst) {
            return Err(TransportError::RadioOff);
        }
        if let Some(reason) = self.scan_error.read().clone() {
            return Err(TransportError::ScanFailed(reason));
        }
        Ok(self
            .devices
            .read()
            .iter()
            .filter(|d| d.matches_name(name_filters))
            .cloned()
            .collect())
    }

    async fn connect(&self, device: &DeviceRecord) -> Result<(), TransportError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let mode = self.connect_mode.read().clone();
        match mode {
            ConnectMode::Accept => {
                tracing::debug!(device = %device.id, "Mock transport: connected");
                self.connected.store(true, Ordering::SeqCst);
                self.connected_ids.write().push(device.id.clone());
                Ok(())
            }
            ConnectMode::Reject(reason) => Err(TransportError::ConnectFailed(reason)),
            ConnectMode::Hang => std::future::pending().await,
        }
    }

    async fn discover_services(
        &self,
        _device: &DeviceRecord,
    ) -> Result<Vec<ServiceInfo>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        Ok(self.services.read().clone())
    }

    async fn write(&self, _characteristic: &str, data: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.writes.write().push(data.to_vec());

        let command = String::from_utf8_lossy(data).trim().to_string();
        let lines = match &*self.responder.read() {
            Some(responder) => responder(&command),
            None => return Ok(()),
        };

        // Deliver each line as its own notification chunk, the way a real
        // adapter streams MTU-sized pieces, then the prompt marker.
        for line in lines {
            let mut chunk = line.into_bytes();
            chunk.push(b'\r');
            let _ = self.notify_tx.send(chunk);
        }
        let _ = self.notify_tx.send(b">".to_vec());
        Ok(())
    }

    fn subscribe_notifications(&self) -> broadcast::Receiver<Vec<u8>> {
        self.notify_tx.subscribe()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    async fn disconnect(&self, device: &DeviceRecord) {
        tracing::debug!(device = %device.id, "Mock transport: disconnected");
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_device(mock: &MockBleTransport) -> DeviceRecord {
        mock.devices.read()[0].clone()
    }

    #[tokio::test]
    async fn scan_respects_radio_and_filters() {
        let mock = MockBleTransport::with_elm_defaults();

        let found = mock
            .scan(Duration::from_secs(4), &["obdii".into()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let none = mock
            .scan(Duration::from_secs(4), &["vgate".into()])
            .await
            .unwrap();
        assert!(none.is_empty());

        mock.set_radio_on(false);
        assert!(matches!(
            mock.scan(Duration::from_secs(4), &[]).await,
            Err(TransportError::RadioOff)
        ));
    }

    #[tokio::test]
    async fn responder_answers_writes_with_prompt_terminated_chunks() {
        let mock = MockBleTransport::with_elm_defaults();
        let device = first_device(&mock);
        mock.connect(&device).await.unwrap();
        mock.set_responder(Box::new(|cmd| {
            assert_eq!(cmd, "ATZ");
            vec!["ELM327 v1.5".into()]
        }));

        let mut rx = mock.subscribe_notifications();
        mock.write("fff2", b"ATZ\r").await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"ELM327 v1.5\r".to_vec());
        assert_eq!(rx.recv().await.unwrap(), b">".to_vec());
        assert_eq!(mock.written_commands(), vec!["ATZ".to_string()]);
    }

    #[tokio::test]
    async fn rejected_connects_are_counted() {
        let mock = MockBleTransport::with_elm_defaults();
        let device = first_device(&mock);
        mock.set_connect_mode(ConnectMode::Reject("peer busy".into()));

        for _ in 0..3 {
            assert!(mock.connect(&device).await.is_err());
        }
        assert_eq!(mock.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn drop_link_emits_event_and_clears_connection() {
        let mock = MockBleTransport::with_elm_defaults();
        let device = first_device(&mock);
        mock.connect(&device).await.unwrap();

        let mut events = mock.subscribe_events();
        mock.drop_link("supervision timeout");

        let LinkEvent::Dropped { reason } = events.recv().await.unwrap();
        assert_eq!(reason, "supervision timeout");
        assert!(matches!(
            mock.write("fff2", b"ATZ\r").await,
            Err(TransportError::NotConnected)
        ));
    }
}
