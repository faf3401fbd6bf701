//! evlinkd - EV diagnostics link daemon
//!
//! Keeps a BLE link to an ELM327-style OBD adapter alive and polls the EV
//! metric catalog while connected.
//!
//! Usage:
//!   evlinkd [OPTIONS] [config.toml]
//!
//! Options:
//!   --poll <secs>  Interval between catalog polls while connected
//!
//! A platform BLE transport (CoreBluetooth, BlueZ) is wired in by the
//! embedding application; standalone the daemon runs against the simulated
//! adapter, which is enough to exercise the full lifecycle.

use std::sync::Arc;
use std::time::Duration;

use evlink_ble::MockBleTransport;
use evlink_core::{Clock, SystemClock};
use evlink_manager::{LinkConfig, LinkManager};
use evlink_obd::{catalog, SimulatedEcu};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parsed command-line arguments
struct Args {
    /// Link config file (TOML)
    config_path: Option<String>,
    /// Catalog poll interval in seconds
    poll_secs: u64,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut result = Args {
        config_path: None,
        poll_secs: 10,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--poll" | "-p" => {
                if i + 1 < args.len() {
                    match args[i + 1].parse() {
                        Ok(secs) => result.poll_secs = secs,
                        Err(_) => tracing::error!("Invalid value for --poll: {}", args[i + 1]),
                    }
                    i += 2;
                } else {
                    tracing::error!("Missing argument for --poll");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                // Positional argument = config file
                result.config_path = Some(arg.to_string());
                i += 1;
            }
            _ => {
                tracing::warn!("Unknown argument: {}", args[i]);
                i += 1;
            }
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"evlinkd - EV diagnostics link daemon

Usage: evlinkd [OPTIONS] [config.toml]

Options:
  -p, --poll <secs>  Interval between catalog polls while connected
                     (default: 10)
  -h, --help         Print this help message

Examples:
  # Run against the simulated adapter with defaults
  evlinkd

  # Run with a link config file, polling every 30 seconds
  evlinkd --poll 30 link.toml
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evlinkd=info,evlink_manager=debug,evlink_obd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting evlinkd");

    let args = parse_args();

    let config = match args.config_path {
        Some(ref path) => {
            tracing::info!("Loading config from: {}", path);
            LinkConfig::from_file(path)?
        }
        None => {
            tracing::info!("No config file provided, using defaults");
            LinkConfig::default()
        }
    };

    let transport = Arc::new(MockBleTransport::with_elm_defaults());
    SimulatedEcu::attach(&transport);
    tracing::info!("Using simulated adapter transport");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let manager = Arc::new(LinkManager::new(transport, clock, config));

    // Log every status transition
    let mut statuses = manager.subscribe_status();
    tokio::spawn(async move {
        while let Ok(status) = statuses.recv().await {
            tracing::info!(status = %status, "link status changed");
        }
    });

    manager.start()?;

    // Poll the catalog while the link is up
    let poller = manager.clone();
    let poll_interval = Duration::from_secs(args.poll_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            if !poller.is_connected() {
                continue;
            }
            for spec in catalog() {
                match poller.run(spec).await {
                    Ok(values) => match serde_json::to_string(&values) {
                        Ok(json) => tracing::info!(command = spec.name, %json, "metrics"),
                        Err(e) => tracing::warn!(command = spec.name, error = %e, "serialize failed"),
                    },
                    Err(e) => tracing::warn!(command = spec.name, error = %e, "poll failed"),
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    manager.stop().await;

    Ok(())
}
