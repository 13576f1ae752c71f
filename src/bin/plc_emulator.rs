// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bench PLC emulator
//!
//! Serves the station register map as Modbus RTU holding registers on a serial
//! port. Pair it with the station through a null-modem cable or a virtual pair:
//!
//! ```bash
//! socat -d -d pty,raw,echo=0,link=/tmp/plc pty,raw,echo=0,link=/tmp/station
//! plc_emulator --port /tmp/plc --tick-ms 1000
//! rust_scan_station --port /tmp/station
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::time::Duration;
use tokio_serial::SerialPortBuilderExt;

use rust_scan_station::config::Config;
use rust_scan_station::modbus::{PlcEmulator, RegisterMap};

/// Modbus RTU emulator of the line PLC
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Station configuration providing the register map and serial settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port to serve on (overrides the configuration)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (overrides the configuration)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Advance read-only signals and acknowledge the completion signal at
    /// this period in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_args(args.port.clone(), args.baud, None, None);
    let map = config.register_map()?;
    let emulator = PlcEmulator::new(&map);

    println!("--- Scan station PLC emulator ---");
    println!(
        "Listening on: {} @ {} baud, slave {}",
        config.serial.port, config.serial.baud_rate, config.serial.slave_id
    );
    println!("Holding registers:");
    for spec in map.iter() {
        println!("  - {:<20} {:>5} ({:?})", spec.name, spec.address, spec.access);
    }

    if let Some(period) = args.tick_ms {
        tokio::spawn(animate(
            emulator.clone(),
            map.clone(),
            config.completion.clone(),
            Duration::from_millis(period),
        ));
    }

    let port = tokio_serial::new(config.serial.port.as_str(), config.serial.baud_rate)
        .parity(config.serial.parity.into())
        .open_native_async()
        .with_context(|| format!("Failed to open {}", config.serial.port))?;

    let server = tokio_modbus::server::rtu::Server::new(port);
    server.serve_forever(emulator).await?;

    Ok(())
}

/// Behave like the line PLC: division counters move on, and a raised
/// completion signal is acknowledged by resetting it on the next tick.
async fn animate(
    emulator: PlcEmulator,
    map: RegisterMap,
    completion: rust_scan_station::config::CompletionConfig,
    period: Duration,
) {
    let completion_address = map.get(&completion.signal).map(|spec| spec.address);
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        for spec in map.iter().filter(|spec| !spec.access.is_writable()) {
            let value = emulator.register(spec.address).unwrap_or(0);
            emulator.set_register(spec.address, value.wrapping_add(1));
        }
        if let Some(address) = completion_address {
            if emulator.register(address) == Some(completion.value) {
                info!("Completion signal acknowledged");
                emulator.set_register(address, completion.reset_value);
            }
        }
    }
}
