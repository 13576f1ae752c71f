// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the scan station operator console

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::info;
use std::path::PathBuf;
use tokio::io::{self, BufReader};
use tokio::signal;

use rust_scan_station::config::{self, Config, StartupMode};
use rust_scan_station::console;
use rust_scan_station::daemon::Daemon;
use rust_scan_station::station::Station;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Hardware,
    Simulation,
    Idle,
}

impl From<ModeArg> for StartupMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Hardware => StartupMode::Hardware,
            ModeArg::Simulation => StartupMode::Simulation,
            ModeArg::Idle => StartupMode::Idle,
        }
    }
}

/// Scan station: PLC synchronization over Modbus RTU and child part verification
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Serial port of the PLC link
    #[arg(long)]
    port: Option<String>,

    /// Baud rate of the PLC link
    #[arg(long)]
    baud: Option<u32>,

    /// Modbus unit id of the PLC
    #[arg(long)]
    slave_id: Option<u8>,

    /// How the PLC link is brought up at startup
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Shorthand for --mode simulation
    #[arg(long, conflicts_with = "mode")]
    simulate: bool,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger with appropriate level based on verbose and quiet flags
    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }
        Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let mut config = Config::from_file(&config_path)?;

    let mode = if args.simulate {
        Some(StartupMode::Simulation)
    } else {
        args.mode.map(StartupMode::from)
    };
    config.apply_args(args.port.clone(), args.baud, args.slave_id, mode);
    config.validate()?;

    info!(
        "Scan station starting ({} @ {} baud, slave {}, {:?} mode)",
        config.serial.port, config.serial.baud_rate, config.serial.slave_id, config.plc.mode
    );

    let mut station = Station::from_config(&config)?;
    let mut daemon = Daemon::new();
    daemon.launch(&config, &mut station).await?;

    println!("Scan station ready, type 'help' for commands");
    let stdin = BufReader::new(io::stdin());
    tokio::select! {
        result = console::run(&mut station, stdin, io::stdout()) => result?,
        _ = signal::ctrl_c() => info!("Received Ctrl+C"),
    }

    daemon.shutdown();
    daemon.join().await?;
    station.shutdown().await;
    info!("Scan station stopped");
    Ok(())
}
