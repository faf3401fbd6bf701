//! Discovered peer and service descriptors

use serde::{Deserialize, Serialize};

/// A peer seen during one scan cycle
///
/// Records are transient: identifiers and RSSI are only meaningful for the
/// scan that produced them, so nothing here is cached across cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Platform identifier (MAC on Linux/Android, CB UUID on Apple)
    pub id: String,
    /// Advertised local name, if the advertisement carried one
    pub name: Option<String>,
    /// Signal strength in dBm at scan time
    pub rssi: i16,
    /// Advertised service UUIDs (lowercase, no dashes for 16-bit shorts)
    #[serde(default)]
    pub service_uuids: Vec<String>,
    /// Raw manufacturer data from the advertisement
    #[serde(default)]
    pub manufacturer_data: Vec<u8>,
}

impl DeviceRecord {
    /// True when the advertised name contains any of the filters
    /// (case-insensitive); an empty filter list matches everything.
    pub fn matches_name(&self, filters: &[String]) -> bool {
        if filters.is_empty() {
            return true;
        }
        let Some(name) = &self.name else {
            return false;
        };
        let name = name.to_ascii_lowercase();
        filters
            .iter()
            .any(|f| name.contains(&f.to_ascii_lowercase()))
    }

    /// True when the advertisement listed the given service UUID
    pub fn advertises_service(&self, uuid: &str) -> bool {
        self.service_uuids
            .iter()
            .any(|s| s.eq_ignore_ascii_case(uuid))
    }
}

/// A GATT service discovered on a connected peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub uuid: String,
    /// Characteristic UUIDs under this service
    pub characteristics: Vec<String>,
}

impl ServiceInfo {
    pub fn has_characteristic(&self, uuid: &str) -> bool {
        self.characteristics
            .iter()
            .any(|c| c.eq_ignore_ascii_case(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: Option<&str>) -> DeviceRecord {
        DeviceRecord {
            id: "AA:BB:CC:DD:EE:FF".into(),
            name: name.map(String::from),
            rssi: -60,
            service_uuids: vec![],
            manufacturer_data: vec![],
        }
    }

    #[test]
    fn name_filter_is_case_insensitive_substring() {
        let dev = record(Some("OBDII-Link"));
        assert!(dev.matches_name(&["obdii".into()]));
        assert!(dev.matches_name(&["vlink".into(), "LINK".into()]));
        assert!(!dev.matches_name(&["torque".into()]));
    }

    #[test]
    fn empty_filters_match_even_nameless_devices() {
        assert!(record(None).matches_name(&[]));
        assert!(!record(None).matches_name(&["obd".into()]));
    }

    #[test]
    fn advertised_services_match_case_insensitively() {
        let mut dev = record(Some("OBDII"));
        assert!(!dev.advertises_service("fff0"));

        dev.service_uuids = vec!["FFF0".into(), "180a".into()];
        assert!(dev.advertises_service("fff0"));
        assert!(!dev.advertises_service("fff1"));
    }
}
