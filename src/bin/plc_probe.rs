// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Offline PLC discovery
//!
//! Sweeps serial ports, baud rates and slave ids, and reports every
//! combination that answers a holding-register read. Use it once at
//! commissioning to fill the `serial` section of the station configuration.

use anyhow::{Context, Result};
use clap::Parser;
use rust_scan_station::config::{Parity, SerialConfig};
use rust_scan_station::modbus::{ModbusTransport, RtuTransport, TransportError};

/// Modbus RTU discovery for the line PLC
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Serial ports to try (default: every port found on the system)
    #[arg(long, value_delimiter = ',')]
    ports: Vec<String>,

    /// Baud rates to try
    #[arg(long, value_delimiter = ',', default_value = "9600,19200,38400,57600,115200")]
    bauds: Vec<u32>,

    /// First slave id to try
    #[arg(long, default_value_t = 0)]
    first_slave: u8,

    /// Last slave id to try
    #[arg(long, default_value_t = 5)]
    last_slave: u8,

    /// Parity of the line (none, even, odd)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Holding register to read
    #[arg(long, default_value_t = 0)]
    register: u16,

    /// Number of registers to read
    #[arg(long, default_value_t = 1)]
    quantity: u16,

    /// Response timeout per attempt in milliseconds
    #[arg(long, default_value_t = 200)]
    timeout_ms: u64,

    /// Stop at the first answering combination
    #[arg(long)]
    first: bool,
}

fn parse_parity(parity: &str) -> Result<Parity> {
    match parity.to_ascii_lowercase().as_str() {
        "none" | "n" => Ok(Parity::None),
        "even" | "e" => Ok(Parity::Even),
        "odd" | "o" => Ok(Parity::Odd),
        other => anyhow::bail!("Unknown parity '{}'", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn"),
    );

    let args = Args::parse();
    let parity = parse_parity(&args.parity)?;

    let ports = if args.ports.is_empty() {
        tokio_serial::available_ports()
            .context("Failed to enumerate serial ports")?
            .into_iter()
            .map(|port| port.port_name)
            .collect()
    } else {
        args.ports.clone()
    };
    if ports.is_empty() {
        anyhow::bail!("No serial port found, use --ports");
    }

    println!(
        "Probing {} port(s) x {} baud rate(s) x slaves {}..={}, register {} x{}",
        ports.len(),
        args.bauds.len(),
        args.first_slave,
        args.last_slave,
        args.register,
        args.quantity
    );

    let mut found = 0usize;
    'sweep: for port in &ports {
        for &baud_rate in &args.bauds {
            let serial = SerialConfig {
                port: port.clone(),
                baud_rate,
                parity,
                timeout_ms: args.timeout_ms,
                ..SerialConfig::default()
            };
            let mut transport = match RtuTransport::open(&serial) {
                Ok(transport) => transport,
                Err(err) => {
                    println!("{port}: {err}");
                    continue 'sweep;
                }
            };

            for slave_id in args.first_slave..=args.last_slave {
                match transport
                    .read_holding_registers(args.register, args.quantity, slave_id)
                    .await
                {
                    Ok(values) => {
                        found += 1;
                        println!(
                            "FOUND {port} @ {baud_rate} baud, slave {slave_id}: {values:?}"
                        );
                    }
                    // An exception still proves a device answers at these settings
                    Err(TransportError::ExceptionResponse(code)) => {
                        found += 1;
                        println!(
                            "FOUND {port} @ {baud_rate} baud, slave {slave_id}: exception {code:#04x}"
                        );
                    }
                    Err(err) => {
                        log::debug!("{port} @ {baud_rate}, slave {slave_id}: {err}");
                        continue;
                    }
                }
                if args.first {
                    transport.close().await;
                    break 'sweep;
                }
            }
            transport.close().await;
        }
    }

    if found == 0 {
        println!("No PLC answered");
    } else {
        println!("{found} answering combination(s)");
    }
    Ok(())
}
