// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Line-oriented operator console
//!
//! Each input line is one command. A line that is not a command keyword is
//! taken as a barcode, which is what a keyboard-wedge scanner produces.
//!
//! | Command                    | Effect                                   |
//! |----------------------------|------------------------------------------|
//! | `start <main part>`        | begin verifying a unit                   |
//! | `scan <code>` / `<code>`   | record a scanned barcode                 |
//! | `abort`                    | drop the current unit                    |
//! | `status`                   | show PLC link, snapshot and unit progress|
//! | `connect` / `disconnect`   | open or release the serial link          |
//! | `sim on` / `sim off`       | switch the simulator on or off           |
//! | `override <signal> <v>`    | force a value into the next simulated snapshot |
//! | `write <signal> <v>`       | write a signal to the PLC                |
//! | `retry`                    | write the completion signal again        |
//! | `help`                     | list commands                            |
//! | `quit`                     | leave the console                        |

use std::fmt::Write as _;

use anyhow::{Context, Result};
use log::debug;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::scan::{PartStatus, ScanVerdict};
use crate::station::{Station, UnitOutcome};

const HELP: &str = "commands: start <main>, scan <code>, <code>, abort, status, connect, \
disconnect, sim on|off, override <signal> <value>, write <signal> <value>, retry, help, quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start(String),
    Scan(String),
    Abort,
    Status,
    Connect,
    Disconnect,
    Simulation(bool),
    Override { signal: String, value: u16 },
    Write { signal: String, value: u16 },
    Retry,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse one input line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        // Barcodes are passed through byte for byte, spaces included
        if let Some(code) = line.trim_start().strip_prefix("scan ") {
            if code.trim().is_empty() {
                anyhow::bail!("invalid arguments for 'scan'");
            }
            return Ok(Some(Self::Scan(code.to_string())));
        }

        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (keyword, args.as_slice()) {
            ("start", [main]) => Self::Start(main.to_string()),
            ("scan", [code]) => Self::Scan(code.to_string()),
            ("abort", []) => Self::Abort,
            ("status", []) => Self::Status,
            ("connect", []) => Self::Connect,
            ("disconnect", []) => Self::Disconnect,
            ("sim", ["on"]) => Self::Simulation(true),
            ("sim", ["off"]) => Self::Simulation(false),
            ("override", [signal, value]) => Self::Override {
                signal: signal.to_string(),
                value: parse_value(value)?,
            },
            ("write", [signal, value]) => Self::Write {
                signal: signal.to_string(),
                value: parse_value(value)?,
            },
            ("retry", []) => Self::Retry,
            ("help", []) => Self::Help,
            ("quit" | "exit", []) => Self::Quit,
            (
                "start" | "scan" | "abort" | "status" | "connect" | "disconnect" | "sim"
                | "override" | "write" | "retry" | "help" | "quit" | "exit",
                _,
            ) => anyhow::bail!("invalid arguments for '{}'", keyword),
            (code, []) => Self::Scan(code.to_string()),
            _ => anyhow::bail!("unknown command '{}'", keyword),
        };
        Ok(Some(command))
    }
}

fn parse_value(value: &str) -> Result<u16> {
    value
        .parse()
        .with_context(|| format!("'{}' is not a register value (0-65535)", value))
}

/// Run one command against the station and render the reply
pub async fn execute(station: &mut Station, command: &ConsoleCommand) -> String {
    debug!("Console command: {:?}", command);
    match command {
        ConsoleCommand::Start(main) => match station.start_unit(main).await {
            Ok(count) => format!("unit {}: {} part(s) to scan", main, count),
            Err(err) => format!("ERROR: {}", err),
        },
        ConsoleCommand::Scan(code) => match station.scan(code).await {
            Ok(report) => {
                let verdict = match report.result.verdict {
                    ScanVerdict::Accepted => "OK",
                    ScanVerdict::Duplicate => "OK (already scanned)",
                    ScanVerdict::NotExpected => "NG (not expected)",
                    ScanVerdict::OutOfOrder => "NG (out of order)",
                };
                let progress = match report.outcome {
                    UnitOutcome::InProgress {
                        ok_count,
                        expected_count,
                    } => format!("{}/{}", ok_count, expected_count),
                    UnitOutcome::Completed(unit) => {
                        format!("unit {} COMPLETE", unit.main_part_number)
                    }
                    UnitOutcome::AwaitingSignal(err) => {
                        format!("unit complete, completion signal failed: {} (use 'retry')", err)
                    }
                };
                format!("{} {} - {}", code, verdict, progress)
            }
            Err(err) => format!("ERROR: {}", err),
        },
        ConsoleCommand::Abort => {
            if station.abort_unit() {
                "unit aborted".to_string()
            } else {
                "no unit in progress".to_string()
            }
        }
        ConsoleCommand::Status => status(station),
        ConsoleCommand::Connect => match station.plc_mut().connect().await {
            Ok(()) => format!("PLC {}", station.plc().state()),
            Err(err) => format!("ERROR: {}", err),
        },
        ConsoleCommand::Disconnect => {
            station.plc_mut().disconnect().await;
            format!("PLC {}", station.plc().state())
        }
        ConsoleCommand::Simulation(true) => {
            station.plc_mut().enable_simulation().await;
            format!("PLC {}", station.plc().state())
        }
        ConsoleCommand::Simulation(false) => match station.plc_mut().disable_simulation().await {
            Ok(()) => format!("PLC {}", station.plc().state()),
            Err(err) => format!("ERROR: {}", err),
        },
        ConsoleCommand::Override { signal, value } => {
            match station.plc().set_simulated_override(signal, *value).await {
                Ok(()) => format!("{} forced to {} for the next snapshot", signal, value),
                Err(err) => format!("ERROR: {}", err),
            }
        }
        ConsoleCommand::Write { signal, value } => {
            match station.plc().write_signal(signal, *value).await {
                Ok(()) => format!("{} <- {}", signal, value),
                Err(err) => format!("ERROR: {}", err),
            }
        }
        ConsoleCommand::Retry => match station.retry_completion().await {
            Ok(UnitOutcome::Completed(unit)) => format!("unit {} COMPLETE", unit.main_part_number),
            Ok(UnitOutcome::AwaitingSignal(err)) => {
                format!("completion signal failed again: {}", err)
            }
            Ok(UnitOutcome::InProgress { .. }) => "unit still in progress".to_string(),
            Err(err) => format!("ERROR: {}", err),
        },
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Quit => "bye".to_string(),
    }
}

fn status(station: &Station) -> String {
    let mut out = String::new();
    let snapshot = station.plc().get_snapshot();
    let _ = write!(out, "PLC {}", station.plc().state());
    if snapshot.is_sentinel() {
        let _ = write!(out, ", no snapshot yet");
    } else {
        let _ = write!(
            out,
            ", snapshot {}{}:",
            snapshot.sequence,
            if snapshot.connected { "" } else { " (stale)" }
        );
        for (name, value) in &snapshot.values {
            let _ = write!(out, " {}={}", name, value);
        }
    }

    match (station.verifier().session(), station.pending_completion()) {
        (_, Some(unit)) => {
            let _ = write!(
                out,
                "\nunit {} complete, waiting for completion signal",
                unit.main_part_number
            );
        }
        (Some(session), None) => {
            let _ = write!(
                out,
                "\nunit {}: {}/{}",
                session.main_part_number(),
                session.ok_count(),
                session.expected_count()
            );
            for (part, part_status) in session.per_part_status() {
                let label = match part_status {
                    PartStatus::Pending => "pending",
                    PartStatus::Ok => "OK",
                    PartStatus::Ng => "NG",
                };
                let _ = write!(out, "\n  {} {} [{}]", part.part_number, part.part_name, label);
            }
        }
        (None, None) => {
            let _ = write!(out, "\nno unit in progress");
        }
    }
    out
}

/// Read commands until `quit` or end of input
pub async fn run<R, W>(station: &mut Station, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read console input")? {
        let reply = match ConsoleCommand::parse(&line) {
            Ok(None) => continue,
            Ok(Some(command)) => {
                let reply = execute(station, &command).await;
                if command == ConsoleCommand::Quit {
                    output.write_all(format!("{}\n", reply).as_bytes()).await?;
                    break;
                }
                reply
            }
            Err(err) => format!("ERROR: {:#}", err),
        };
        output.write_all(format!("{}\n", reply).as_bytes()).await?;
        output.flush().await?;
    }
    output.flush().await?;
    Ok(())
}
