//! Link manager configuration
//!
//! Deserialized from TOML; every field has a default so an empty file (or
//! no file at all) yields a working configuration for the common fff0/fff1/
//! fff2 ELM327 clones.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use evlink_ble::{ELM_NOTIFY_UUID, ELM_SERVICE_UUID, ELM_WRITE_UUID};
use evlink_obd::{ElmConfig, FlowControlMode};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Case-insensitive substrings matched against advertised device names;
    /// empty means accept any device
    pub adapter_names: Vec<String>,

    pub service_uuid: String,
    pub notify_characteristic: String,
    pub write_characteristic: String,

    /// CAN request header for the default ECU
    pub ecu_header: String,
    pub flow_control_header: String,
    /// ELM protocol number programmed with `ATSP`
    pub protocol: u8,
    /// Whether the adapter answers first frames with flow control itself
    pub adapter_flow_control: bool,

    pub scan_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,

    /// Bounded connect retries within one attempt cycle
    pub connect_attempts: u32,
    /// Pause between reconnection attempt cycles
    pub reconnect_interval_secs: u64,

    /// Catalog command issued after init to prove the ECU answers
    pub probe_command: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            adapter_names: default_adapter_names(),
            service_uuid: ELM_SERVICE_UUID.to_string(),
            notify_characteristic: ELM_NOTIFY_UUID.to_string(),
            write_characteristic: ELM_WRITE_UUID.to_string(),
            ecu_header: "7E4".to_string(),
            flow_control_header: "7E4".to_string(),
            protocol: 6,
            adapter_flow_control: true,
            scan_timeout_secs: 4,
            connect_timeout_secs: 10,
            command_timeout_secs: 5,
            connect_attempts: 3,
            reconnect_interval_secs: 30,
            probe_command: "soc_display".to_string(),
        }
    }
}

fn default_adapter_names() -> Vec<String> {
    ["obdii", "obd", "elm", "vlink"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl LinkConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    /// Adapter dialogue settings derived from this config
    pub fn elm_config(&self) -> ElmConfig {
        ElmConfig {
            ecu_header: self.ecu_header.clone(),
            flow_control_header: self.flow_control_header.clone(),
            protocol: self.protocol,
            write_characteristic: self.write_characteristic.clone(),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            flow_control: if self.adapter_flow_control {
                FlowControlMode::Adapter
            } else {
                FlowControlMode::Tester
            },
        }
    }
}
