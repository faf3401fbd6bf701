//! ELM327 adapter driver
//!
//! [`ElmRunner`] owns the dialogue with the adapter: the one-time AT init
//! sequence and the request/response exchange for catalog commands. All
//! exchanges are serialized behind one async mutex because the adapter is a
//! half-duplex device and interleaved writes corrupt both responses.
//!
//! Timeouts are measured against the injected [`Clock`], never wall time,
//! so the whole dialogue can be driven in virtual time under test.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use evlink_ble::{BleTransport, TransportError, ELM_WRITE_UUID};
use evlink_core::{Clock, ValueMap};

use crate::command::CommandSpec;
use crate::error::ObdError;
use crate::isotp::{RawFrame, Reassembler, Step};

/// Who emits the ISO-TP flow control frame after a first frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControlMode {
    /// Adapter auto-responds using the data programmed with `ATFCSD`
    Adapter,
    /// We write the flow control payload ourselves when a first frame lands
    Tester,
}

/// Adapter dialogue settings
#[derive(Debug, Clone)]
pub struct ElmConfig {
    /// CAN request header selected with `ATSH` at init
    pub ecu_header: String,
    /// Header for outgoing flow control frames (`ATFCSH`)
    pub flow_control_header: String,
    /// ELM protocol number (`ATSP`); 6 is CAN 11-bit / 500k
    pub protocol: u8,
    /// GATT characteristic commands are written to
    pub write_characteristic: String,
    /// Window for one full exchange, from write to prompt
    pub command_timeout: Duration,
    pub flow_control: FlowControlMode,
}

impl Default for ElmConfig {
    fn default() -> Self {
        Self {
            ecu_header: "7E4".to_string(),
            flow_control_header: "7E4".to_string(),
            protocol: 6,
            write_characteristic: ELM_WRITE_UUID.to_string(),
            command_timeout: Duration::from_secs(5),
            flow_control: FlowControlMode::Adapter,
        }
    }
}

/// State guarded by the exchange mutex
struct ExchangeState {
    initialized: bool,
    /// Header currently programmed into the adapter; rewritten only when a
    /// command needs a different one
    current_header: String,
}

/// Serialized command runner for one connected adapter
pub struct ElmRunner {
    transport: Arc<dyn BleTransport>,
    clock: Arc<dyn Clock>,
    config: ElmConfig,
    exchange: Mutex<ExchangeState>,
}

impl ElmRunner {
    pub fn new(transport: Arc<dyn BleTransport>, clock: Arc<dyn Clock>, config: ElmConfig) -> Self {
        let current_header = config.ecu_header.clone();
        Self {
            transport,
            clock,
            config,
            exchange: Mutex::new(ExchangeState {
                initialized: false,
                current_header,
            }),
        }
    }

    pub fn config(&self) -> &ElmConfig {
        &self.config
    }

    /// Run the AT init sequence; idempotent once it has succeeded
    pub async fn initialize(&self) -> Result<(), ObdError> {
        let mut state = self.exchange.lock().await;
        if state.initialized {
            return Ok(());
        }

        let steps = [
            "ATZ".to_string(),
            "ATE0".to_string(),
            "ATL0".to_string(),
            format!("ATSP{}", self.config.protocol),
            format!("ATSH{}", self.config.ecu_header),
            format!("ATFCSH{}", self.config.flow_control_header),
            "ATFCSD300000".to_string(),
            "ATFCSM1".to_string(),
        ];
        for step in &steps {
            debug!(command = %step, "adapter init step");
            let lines = self.exchange_collect(step).await.map_err(|e| match e {
                ObdError::CommandTimeout => ObdError::AdapterInit {
                    step: step.clone(),
                    reason: "no prompt within timeout".to_string(),
                },
                other => other,
            })?;
            if !acknowledged(step, &lines) {
                return Err(ObdError::AdapterInit {
                    step: step.clone(),
                    reason: format!("unexpected reply {lines:?}"),
                });
            }
        }

        state.current_header = self.config.ecu_header.clone();
        state.initialized = true;
        debug!(header = %state.current_header, "adapter initialized");
        Ok(())
    }

    /// Execute a catalog command and decode its payload
    pub async fn run(&self, spec: &CommandSpec) -> Result<ValueMap, ObdError> {
        let mut state = self.exchange.lock().await;
        if !state.initialized {
            return Err(ObdError::NotInitialized);
        }

        let wanted = spec.header.unwrap_or(&self.config.ecu_header);
        if state.current_header != wanted {
            let cmd = format!("ATSH{wanted}");
            let lines = self.exchange_collect(&cmd).await?;
            if !acknowledged(&cmd, &lines) {
                return Err(ObdError::AdapterFault(format!(
                    "header switch rejected: {lines:?}"
                )));
            }
            state.current_header = wanted.to_string();
        }

        let request = spec.request();
        trace!(command = spec.name, %request, "running command");
        let payload = self.collect_payload(&request).await?;
        spec.decode_response(&payload)
    }

    /// Read the adapter's supply voltage (`ATRV`)
    pub async fn read_voltage(&self) -> Result<f64, ObdError> {
        let state = self.exchange.lock().await;
        if !state.initialized {
            return Err(ObdError::NotInitialized);
        }
        let lines = self.exchange_collect("ATRV").await?;
        for line in &lines {
            let trimmed = line.trim_end_matches(['V', 'v']);
            if let Ok(volts) = trimmed.parse::<f64>() {
                return Ok(volts);
            }
        }
        Err(ObdError::InvalidResponse(format!(
            "no voltage in {lines:?}"
        )))
    }

    /// Write one request and reassemble frame lines until the prompt
    async fn collect_payload(&self, request: &str) -> Result<Vec<u8>, ObdError> {
        let mut stream = LineStream::new(self.transport.subscribe_notifications());
        self.write_line(request).await?;

        let timeout = self.clock.sleep(self.config.command_timeout);
        tokio::pin!(timeout);

        let mut reassembler = Reassembler::new();
        let mut payload: Option<Vec<u8>> = None;
        loop {
            let line = tokio::select! {
                _ = &mut timeout => return Err(ObdError::CommandTimeout),
                line = stream.next_line() => line?,
            };
            let line = match line {
                Line::Prompt => {
                    return payload.ok_or_else(|| {
                        ObdError::InvalidResponse("prompt with no response frames".to_string())
                    });
                }
                Line::Text(text) => text,
            };

            if line.is_empty() || line == "OK" || line == request || line.starts_with("SEARCHING") {
                continue;
            }
            if line == "NO DATA" {
                return Err(ObdError::NoData(request.to_string()));
            }
            if line == "?" || line.contains("ERROR") || line.contains("STOPPED") {
                return Err(ObdError::AdapterFault(line));
            }

            let frame = RawFrame::from_ascii_line(&line)?;
            match reassembler.push(&frame)? {
                Step::Complete(data) => payload = Some(data),
                Step::FlowControlNeeded => {
                    if self.config.flow_control == FlowControlMode::Tester {
                        self.write_line("300000").await?;
                    }
                }
                Step::Pending => {}
            }
        }
    }

    /// Write one AT command and collect reply lines until the prompt
    async fn exchange_collect(&self, command: &str) -> Result<Vec<String>, ObdError> {
        let mut stream = LineStream::new(self.transport.subscribe_notifications());
        self.write_line(command).await?;

        let timeout = self.clock.sleep(self.config.command_timeout);
        tokio::pin!(timeout);

        let mut lines = Vec::new();
        loop {
            let line = tokio::select! {
                _ = &mut timeout => return Err(ObdError::CommandTimeout),
                line = stream.next_line() => line?,
            };
            match line {
                Line::Prompt => return Ok(lines),
                Line::Text(text) => {
                    if !text.is_empty() {
                        lines.push(text);
                    }
                }
            }
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), ObdError> {
        let mut framed = line.as_bytes().to_vec();
        framed.push(b'\r');
        self.transport
            .write(&self.config.write_characteristic, &framed)
            .await?;
        Ok(())
    }
}

/// Did the adapter acknowledge an AT command?
///
/// `ATZ` answers with a version banner instead of `OK`; everything else
/// must contain an `OK` line. Echoed command lines do not count.
fn acknowledged(command: &str, lines: &[String]) -> bool {
    if command == "ATZ" {
        lines.iter().any(|l| l.contains("ELM") || l.as_str() == "OK")
    } else {
        lines.iter().any(|l| l.as_str() == "OK")
    }
}

enum Line {
    Text(String),
    Prompt,
}

/// Turns raw notification chunks into trimmed lines and prompt markers
///
/// Chunk boundaries carry no meaning: a line may span several chunks and a
/// chunk may carry several lines. Buffered text before a prompt byte is
/// flushed as its own line first.
struct LineStream {
    rx: broadcast::Receiver<Vec<u8>>,
    buf: String,
    ready: VecDeque<Line>,
}

impl LineStream {
    fn new(rx: broadcast::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            buf: String::new(),
            ready: VecDeque::new(),
        }
    }

    async fn next_line(&mut self) -> Result<Line, ObdError> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(line);
            }
            let chunk = match self.rx.recv().await {
                Ok(chunk) => chunk,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "notification stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ObdError::Transport(TransportError::ChannelClosed));
                }
            };
            for byte in chunk {
                match byte {
                    b'>' => {
                        self.flush();
                        self.ready.push_back(Line::Prompt);
                    }
                    b'\r' | b'\n' => self.flush(),
                    other => self.buf.push(other as char),
                }
            }
        }
    }

    fn flush(&mut self) {
        let line = self.buf.trim().to_string();
        self.buf.clear();
        self.ready.push_back(Line::Text(line));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use evlink_ble::MockBleTransport;
    use evlink_core::TestClock;

    use crate::command::find_command;
    use crate::sim::SimulatedEcu;

    use super::*;

    async fn connect_first(transport: &MockBleTransport) {
        let mut found = transport.scan(Duration::from_secs(1), &[]).await.unwrap();
        transport.connect(&found.remove(0)).await.unwrap();
    }

    async fn runner_with_sim() -> (Arc<MockBleTransport>, ElmRunner) {
        let transport = Arc::new(MockBleTransport::with_elm_defaults());
        SimulatedEcu::attach(&transport);
        connect_first(&transport).await;
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        let runner = ElmRunner::new(transport.clone(), clock, ElmConfig::default());
        (transport, runner)
    }

    #[tokio::test]
    async fn init_writes_the_full_at_sequence() {
        let (transport, runner) = runner_with_sim().await;
        runner.initialize().await.unwrap();

        let written = transport.written_commands();
        assert_eq!(
            written,
            vec![
                "ATZ", "ATE0", "ATL0", "ATSP6", "ATSH7E4", "ATFCSH7E4", "ATFCSD300000", "ATFCSM1",
            ]
        );
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let (transport, runner) = runner_with_sim().await;
        runner.initialize().await.unwrap();
        runner.initialize().await.unwrap();
        assert_eq!(transport.written_commands().len(), 8);
    }

    #[tokio::test]
    async fn run_before_init_is_rejected() {
        let (_transport, runner) = runner_with_sim().await;
        let spec = find_command("soc_display").unwrap();
        let err = runner.run(spec).await.unwrap_err();
        assert!(matches!(err, ObdError::NotInitialized));
    }

    #[tokio::test]
    async fn single_frame_command_decodes() {
        let (_transport, runner) = runner_with_sim().await;
        runner.initialize().await.unwrap();

        let spec = find_command("soc_display").unwrap();
        let values = runner.run(spec).await.unwrap();
        let soc = values["soc_pct"];
        assert!((soc - 78.43).abs() < 0.01, "soc was {soc}");
    }

    #[tokio::test]
    async fn multi_frame_command_reassembles_and_decodes() {
        let (_transport, runner) = runner_with_sim().await;
        runner.initialize().await.unwrap();

        let spec = find_command("range_remaining").unwrap();
        let values = runner.run(spec).await.unwrap();
        assert!((values["range_remaining_km"] - 62.1).abs() < 1e-9);
        assert!((values["range_full_charge_km"] - 217.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn header_override_switches_and_restores_on_demand() {
        let (transport, runner) = runner_with_sim().await;
        runner.initialize().await.unwrap();

        let tires = find_command("tire_pressure").unwrap();
        runner.run(tires).await.unwrap();
        let soc = find_command("soc_display").unwrap();
        runner.run(soc).await.unwrap();

        let written = transport.written_commands();
        let tail = &written[written.len() - 4..];
        assert_eq!(tail, ["ATSH7E0", "222813", "ATSH7E4", "228334"]);
    }

    #[tokio::test]
    async fn no_data_maps_to_its_own_error() {
        let spec = find_command("odometer").unwrap();
        let transport = Arc::new(MockBleTransport::with_elm_defaults());
        let mut sim = SimulatedEcu::new();
        sim.clear_response(&spec.request());
        sim.install(&transport);
        connect_first(&transport).await;
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        let runner = ElmRunner::new(transport, clock, ElmConfig::default());
        runner.initialize().await.unwrap();

        let err = runner.run(spec).await.unwrap_err();
        assert!(matches!(err, ObdError::NoData(_)));
    }

    #[tokio::test]
    async fn adapter_error_line_maps_to_fault() {
        let transport = Arc::new(MockBleTransport::with_elm_defaults());
        let mut sim = SimulatedEcu::new();
        sim.set_response("228334", vec!["CAN ERROR".to_string()]);
        sim.install(&transport);
        connect_first(&transport).await;
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        let runner = ElmRunner::new(transport, clock, ElmConfig::default());
        runner.initialize().await.unwrap();

        let spec = find_command("soc_display").unwrap();
        let err = runner.run(spec).await.unwrap_err();
        assert!(matches!(err, ObdError::AdapterFault(_)));
    }

    #[tokio::test]
    async fn silent_adapter_times_out_in_virtual_time() {
        let transport = Arc::new(MockBleTransport::with_elm_defaults());
        connect_first(&transport).await;
        // No responder installed: writes go nowhere and no prompt returns.
        let clock = Arc::new(TestClock::new());
        let runner = ElmRunner::new(transport, clock.clone(), ElmConfig::default());

        let init = tokio::spawn(async move { runner.initialize().await });
        tokio::task::yield_now().await;
        clock.advance(Duration::from_secs(5)).await;

        let err = init.await.unwrap().unwrap_err();
        assert!(matches!(err, ObdError::AdapterInit { step, .. } if step == "ATZ"));
    }

    #[tokio::test]
    async fn reads_supply_voltage() {
        let (_transport, runner) = runner_with_sim().await;
        runner.initialize().await.unwrap();
        let volts = runner.read_voltage().await.unwrap();
        assert!((volts - 12.6).abs() < 1e-9);
    }
}
