//! Connection lifecycle manager
//!
//! [`LinkManager`] owns the single authoritative [`ConnectionStatus`] and
//! drives the scan / connect / probe cycle, either once on demand or from a
//! periodic reconnection loop. At most one attempt cycle runs at a time; a
//! tick that lands while one is in flight is dropped, never queued.
//!
//! All waiting goes through the injected [`Clock`], so the full lifecycle
//! (connect timeouts, reconnection intervals) runs in virtual time under
//! test.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use evlink_ble::{BleTransport, DeviceRecord, LinkEvent, MockBleTransport, TransportError};
use evlink_core::{Clock, ConnectionStatus, RetryState, ValueMap};
use evlink_obd::{find_command, CommandSpec, ElmRunner, SimulatedEcu};

use crate::config::LinkConfig;
use crate::error::LinkError;

/// Live link to one adapter, torn down as a unit
struct Session {
    device: DeviceRecord,
    transport: Arc<dyn BleTransport>,
    runner: Arc<ElmRunner>,
    watcher: JoinHandle<()>,
}

struct Inner {
    config: LinkConfig,
    clock: Arc<dyn Clock>,
    real: Arc<dyn BleTransport>,
    /// Simulated transport installed by mock mode; shadows `real` while set
    mock: RwLock<Option<Arc<MockBleTransport>>>,

    status: RwLock<ConnectionStatus>,
    status_tx: broadcast::Sender<ConnectionStatus>,
    retry: RwLock<RetryState>,
    session: RwLock<Option<Session>>,

    /// Attempt cycle in flight; ticks arriving while set are dropped
    busy: AtomicBool,
    stopped: AtomicBool,
    stop: Notify,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Public handle over the shared manager state
pub struct LinkManager {
    inner: Arc<Inner>,
}

impl LinkManager {
    pub fn new(transport: Arc<dyn BleTransport>, clock: Arc<dyn Clock>, config: LinkConfig) -> Self {
        let (status_tx, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                real: transport,
                mock: RwLock::new(None),
                status: RwLock::new(ConnectionStatus::Disconnected),
                status_tx,
                retry: RwLock::new(RetryState::default()),
                session: RwLock::new(None),
                busy: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                stop: Notify::new(),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    /// Start the periodic reconnection loop
    ///
    /// The first attempt runs immediately; afterwards one attempt runs per
    /// reconnection interval whenever the link is down.
    pub fn start(&self) -> Result<(), LinkError> {
        find_command(&self.inner.config.probe_command)
            .ok_or_else(|| LinkError::UnknownCommand(self.inner.config.probe_command.clone()))?;

        let mut handle = self.inner.loop_handle.lock();
        if handle.is_some() {
            return Err(LinkError::AlreadyRunning);
        }
        self.inner.stopped.store(false, Ordering::SeqCst);
        *handle = Some(tokio::spawn(Inner::reconnect_loop(self.inner.clone())));
        Ok(())
    }

    /// Stop the loop and tear the session down
    ///
    /// An attempt cycle already in flight finishes first; teardown happens
    /// after it, not under it.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.stop.notify_one();
        let handle = self.inner.loop_handle.lock().take();
        match handle {
            Some(handle) => {
                let _ = handle.await;
            }
            None => self.inner.teardown(true).await,
        }
    }

    /// Run one attempt cycle now, outside the periodic loop
    pub async fn connect(&self) -> Result<(), LinkError> {
        match Inner::guarded_attempt(&self.inner).await {
            Some(result) => result,
            // An attempt is already in flight
            None => Err(LinkError::AlreadyRunning),
        }
    }

    /// Execute a catalog command over the live session
    pub async fn run(&self, spec: &CommandSpec) -> Result<ValueMap, LinkError> {
        let runner = self
            .inner
            .session
            .read()
            .as_ref()
            .map(|s| s.runner.clone())
            .ok_or(LinkError::NotConnected)?;
        Ok(runner.run(spec).await?)
    }

    pub async fn run_by_name(&self, name: &str) -> Result<ValueMap, LinkError> {
        let spec = find_command(name).ok_or_else(|| LinkError::UnknownCommand(name.to_string()))?;
        self.run(spec).await
    }

    /// Adapter supply voltage over the live session
    pub async fn read_voltage(&self) -> Result<f64, LinkError> {
        let runner = self
            .inner
            .session
            .read()
            .as_ref()
            .map(|s| s.runner.clone())
            .ok_or(LinkError::NotConnected)?;
        Ok(runner.read_voltage().await?)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status.read().is_connected()
    }

    pub fn retry_state(&self) -> RetryState {
        self.inner.retry.read().clone()
    }

    /// Every status transition, in order
    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Route the next attempts at a simulated adapter instead of the real
    /// transport; returns the mock for scripting
    pub fn enable_mock_mode(&self) -> Result<Arc<MockBleTransport>, LinkError> {
        if self.inner.session.read().is_some() {
            return Err(LinkError::MockModeConflict);
        }
        let mock = Arc::new(MockBleTransport::with_elm_defaults());
        SimulatedEcu::attach(&mock);
        info!("mock mode enabled");
        *self.inner.mock.write() = Some(mock.clone());
        Ok(mock)
    }

    pub fn disable_mock_mode(&self) -> Result<(), LinkError> {
        if self.inner.session.read().is_some() {
            return Err(LinkError::MockModeConflict);
        }
        info!("mock mode disabled");
        *self.inner.mock.write() = None;
        Ok(())
    }

    pub fn mock_controller(&self) -> Option<Arc<MockBleTransport>> {
        self.inner.mock.read().clone()
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.loop_handle.lock().take() {
            handle.abort();
        }
        if let Some(session) = self.inner.session.write().take() {
            session.watcher.abort();
        }
    }
}

impl Inner {
    fn active_transport(&self) -> Arc<dyn BleTransport> {
        match &*self.mock.read() {
            Some(mock) => mock.clone(),
            None => self.real.clone(),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        let mut guard = self.status.write();
        if *guard == status {
            return;
        }
        info!(from = guard.label(), to = status.label(), "link status");
        *guard = status.clone();
        drop(guard);
        let _ = self.status_tx.send(status);
    }

    fn record_failure(&self, reason: String) {
        let mut retry = self.retry.write();
        retry.record_failure(reason);
        retry.backoff = self.config.reconnect_interval();
    }

    async fn reconnect_loop(inner: Arc<Inner>) {
        debug!("reconnect loop started");
        loop {
            if inner.stopped.load(Ordering::SeqCst) {
                break;
            }
            if !inner.status.read().is_connected() {
                if let Some(Err(error)) = Inner::guarded_attempt(&inner).await {
                    debug!(%error, "connection attempt failed");
                }
            }
            if inner.stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = inner.stop.notified() => break,
                _ = inner.clock.sleep(inner.config.reconnect_interval()) => {}
            }
        }
        inner.teardown(true).await;
        debug!("reconnect loop stopped");
    }

    /// Run one attempt unless one is already in flight
    async fn guarded_attempt(inner: &Arc<Inner>) -> Option<Result<(), LinkError>> {
        if inner
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        let result = Self::attempt(inner).await;
        if let Err(error) = &result {
            inner.record_failure(error.to_string());
            inner.set_status(ConnectionStatus::Error(error.to_string()));
        }
        inner.busy.store(false, Ordering::SeqCst);
        Some(result)
    }

    /// One full scan / connect / probe cycle
    async fn attempt(inner: &Arc<Inner>) -> Result<(), LinkError> {
        let transport = inner.active_transport();
        // Subscribed before connect so a drop during the probe is not lost
        let events = transport.subscribe_events();

        inner.set_status(ConnectionStatus::Scanning);
        if !transport.is_radio_on().await {
            transport.power_on().await?;
        }
        let devices = transport
            .scan(inner.config.scan_timeout(), &inner.config.adapter_names)
            .await?;
        // Devices advertising the expected service outrank the rest; among
        // those, strongest signal wins and first seen wins ties
        let advertised: Vec<DeviceRecord> = devices
            .iter()
            .filter(|d| d.advertises_service(&inner.config.service_uuid))
            .cloned()
            .collect();
        let pool = if advertised.is_empty() { devices } else { advertised };
        let device = pool
            .into_iter()
            .fold(None::<DeviceRecord>, |best, candidate| match best {
                Some(best) if candidate.rssi > best.rssi => Some(candidate),
                Some(best) => Some(best),
                None => Some(candidate),
            })
            .ok_or(LinkError::NoAdapterFound)?;
        debug!(device = %device.id, name = ?device.name, rssi = device.rssi, "adapter selected");

        inner.set_status(ConnectionStatus::Connecting);
        inner.connect_with_retries(&transport, &device).await?;

        let services = match transport.discover_services(&device).await {
            Ok(services) => services,
            Err(error) => {
                transport.disconnect(&device).await;
                return Err(error.into());
            }
        };
        let supported = services.iter().any(|s| {
            s.uuid.eq_ignore_ascii_case(&inner.config.service_uuid)
                && s.has_characteristic(&inner.config.notify_characteristic)
                && s.has_characteristic(&inner.config.write_characteristic)
        });
        if !supported {
            transport.disconnect(&device).await;
            return Err(LinkError::UnsupportedAdapter {
                service: inner.config.service_uuid.clone(),
            });
        }

        inner.set_status(ConnectionStatus::Probing);
        let runner = Arc::new(ElmRunner::new(
            transport.clone(),
            inner.clock.clone(),
            inner.config.elm_config(),
        ));
        if let Err(error) = inner.probe(&runner).await {
            transport.disconnect(&device).await;
            return Err(error);
        }

        let watcher = Self::spawn_watcher(inner, events);
        *inner.session.write() = Some(Session {
            device,
            transport,
            runner,
            watcher,
        });
        inner.retry.write().reset();
        inner.set_status(ConnectionStatus::Connected);
        Ok(())
    }

    /// Bounded connect retries, each racing the configured timeout
    async fn connect_with_retries(
        &self,
        transport: &Arc<dyn BleTransport>,
        device: &DeviceRecord,
    ) -> Result<(), LinkError> {
        let attempts = self.config.connect_attempts.max(1);
        let mut last = TransportError::ConnectTimeout;
        for attempt in 1..=attempts {
            debug!(attempt, device = %device.id, "connecting");
            let connect = transport.connect(device);
            tokio::pin!(connect);
            let timeout = self.clock.sleep(self.config.connect_timeout());
            tokio::pin!(timeout);
            tokio::select! {
                result = &mut connect => match result {
                    Ok(()) => return Ok(()),
                    Err(error) => {
                        warn!(attempt, %error, "connect failed");
                        last = error;
                        transport.disconnect(device).await;
                    }
                },
                _ = &mut timeout => {
                    warn!(attempt, "connect timed out");
                    last = TransportError::ConnectTimeout;
                    transport.disconnect(device).await;
                }
            }
        }
        Err(LinkError::RetriesExhausted { attempts, last })
    }

    /// Initialize the adapter and prove the ECU answers
    async fn probe(&self, runner: &ElmRunner) -> Result<(), LinkError> {
        runner.initialize().await.map_err(LinkError::ProbeFailed)?;
        match runner.read_voltage().await {
            Ok(volts) => debug!(volts, "adapter supply voltage"),
            Err(error) => warn!(%error, "voltage read failed"),
        }
        let spec = find_command(&self.config.probe_command)
            .ok_or_else(|| LinkError::UnknownCommand(self.config.probe_command.clone()))?;
        runner.run(spec).await.map_err(LinkError::ProbeFailed)?;
        Ok(())
    }

    /// Watch the transport for link drops and fail the session when one lands
    fn spawn_watcher(
        inner: &Arc<Inner>,
        mut events: broadcast::Receiver<LinkEvent>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            while let Ok(LinkEvent::Dropped { reason }) = events.recv().await {
                let Some(inner) = weak.upgrade() else { return };
                warn!(%reason, "adapter link dropped");
                let session = inner.session.write().take();
                inner.record_failure(reason.clone());
                inner.set_status(ConnectionStatus::Error(reason));
                if let Some(session) = session {
                    // Aborts this task; nothing may follow in this iteration
                    session.watcher.abort();
                }
                return;
            }
        })
    }

    async fn teardown(&self, disconnect: bool) {
        let session = self.session.write().take();
        if let Some(session) = session {
            session.watcher.abort();
            if disconnect {
                session.transport.disconnect(&session.device).await;
            }
        }
        self.set_status(ConnectionStatus::Disconnected);
    }
}
