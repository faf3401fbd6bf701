//! Catalog end-to-end tests
//!
//! Every catalog command travels the full path: request line written to the
//! transport, simulated adapter frames back (single and multi frame),
//! ISO-TP reassembly, echo strip and metric decoding.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use evlink_ble::{BleTransport, MockBleTransport};
use evlink_core::{Clock, TestClock, ValueMap};
use evlink_obd::{catalog, find_command, ElmConfig, ElmRunner, ObdError, SimulatedEcu};

async fn connected_runner() -> ElmRunner {
    let transport = Arc::new(MockBleTransport::with_elm_defaults());
    SimulatedEcu::attach(&transport);
    let mut found = transport.scan(Duration::from_secs(1), &[]).await.unwrap();
    transport.connect(&found.remove(0)).await.unwrap();
    let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
    let runner = ElmRunner::new(transport, clock, ElmConfig::default());
    runner.initialize().await.unwrap();
    runner
}

fn value(map: &ValueMap, key: &str) -> f64 {
    *map.get(key).unwrap_or_else(|| panic!("missing field {key}"))
}

#[tokio::test]
async fn every_catalog_command_completes_against_the_simulator() {
    let runner = connected_runner().await;
    for spec in catalog() {
        let values = runner.run(spec).await.unwrap();
        assert!(!values.is_empty(), "{} produced no fields", spec.name);
    }
}

#[tokio::test]
async fn battery_metrics_decode_to_the_recorded_values() {
    let runner = connected_runner().await;

    let soc = runner.run(find_command("soc_display").unwrap()).await.unwrap();
    assert!((value(&soc, "soc_pct") - 78.43).abs() < 0.01);

    let volts = runner.run(find_command("pack_voltage").unwrap()).await.unwrap();
    assert_eq!(value(&volts, "pack_voltage_v"), 350.0);

    let amps = runner.run(find_command("pack_current").unwrap()).await.unwrap();
    assert_eq!(value(&amps, "pack_current_a"), -5.0);

    let temp = runner.run(find_command("battery_temp").unwrap()).await.unwrap();
    assert_eq!(value(&temp, "battery_temp_c"), 20.0);

    let capacity = runner
        .run(find_command("usable_capacity").unwrap())
        .await
        .unwrap();
    assert_eq!(value(&capacity, "usable_capacity_kwh"), 60.0);
}

#[tokio::test]
async fn multi_frame_range_response_reassembles_and_decodes() {
    let runner = connected_runner().await;
    let values = runner
        .run(find_command("range_remaining").unwrap())
        .await
        .unwrap();
    assert!((value(&values, "range_remaining_km") - 62.1).abs() < 1e-9);
    assert!((value(&values, "range_full_charge_km") - 217.6).abs() < 1e-9);
}

#[tokio::test]
async fn three_frame_bms_block_reassembles_and_decodes() {
    let runner = connected_runner().await;
    let values = runner.run(find_command("bms_status").unwrap()).await.unwrap();
    assert_eq!(value(&values, "cell_min_v"), 3.7);
    assert_eq!(value(&values, "cell_min_index"), 23.0);
    assert_eq!(value(&values, "cell_max_index"), 64.0);
    assert_eq!(value(&values, "module_temp_min_c"), 18.0);
    assert_eq!(value(&values, "module_temp_max_c"), 20.0);
    assert_eq!(value(&values, "pack_voltage_v"), 350.0);
    assert_eq!(value(&values, "charging"), 1.0);
}

#[tokio::test]
async fn body_module_command_switches_headers_transparently() {
    let runner = connected_runner().await;

    let tires = runner.run(find_command("tire_pressure").unwrap()).await.unwrap();
    assert_eq!(value(&tires, "tire_fl_psi"), 34.5);
    assert_eq!(value(&tires, "tire_fr_psi"), 35.0);
    assert_eq!(value(&tires, "tire_rl_psi"), 34.0);
    assert_eq!(value(&tires, "tire_rr_psi"), 33.5);

    // Back on the default header, the battery commands still answer
    let soc = runner.run(find_command("soc_display").unwrap()).await.unwrap();
    assert!((value(&soc, "soc_pct") - 78.43).abs() < 0.01);
}

#[tokio::test]
async fn standard_mode_pid_uses_the_short_request_form() {
    let runner = connected_runner().await;
    let values = runner.run(find_command("ambient_temp").unwrap()).await.unwrap();
    assert_eq!(value(&values, "ambient_temp_c"), 15.0);
}

#[tokio::test]
async fn odometer_decodes_a_four_byte_value() {
    let runner = connected_runner().await;
    let values = runner.run(find_command("odometer").unwrap()).await.unwrap();
    assert_eq!(value(&values, "odometer_km"), 38569.84);
}

#[tokio::test]
async fn silent_pid_surfaces_as_no_data() {
    let transport = Arc::new(MockBleTransport::with_elm_defaults());
    let mut sim = SimulatedEcu::new();
    sim.clear_response("222203");
    sim.install(&transport);
    let mut found = transport.scan(Duration::from_secs(1), &[]).await.unwrap();
    transport.connect(&found.remove(0)).await.unwrap();
    let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
    let runner = ElmRunner::new(transport, clock, ElmConfig::default());
    runner.initialize().await.unwrap();

    let err = runner
        .run(find_command("odometer").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, ObdError::NoData(_)));
}
