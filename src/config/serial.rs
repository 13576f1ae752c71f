// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Serial link configuration
//!
//! This module defines the structures for configuring the Modbus RTU serial
//! link between the station and the line PLC.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parity setting of the serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Configuration for the Modbus RTU serial link.
///
/// # Fields
///
/// * `port` - Serial device identifier (e.g. `/dev/ttyUSB0` or `COM3`)
/// * `baud_rate` - Line speed in bits per second (default: 9600)
/// * `parity` - Parity bit setting (default: none)
/// * `stop_bits` - Number of stop bits, 1 or 2 (default: 1)
/// * `data_bits` - Character size, 5 to 8 (default: 8)
/// * `timeout_ms` - Per-call response timeout in milliseconds (default: 500)
/// * `slave_id` - Modbus unit id of the PLC on the bus (default: 1)
///
/// # Example
///
/// ```
/// use rust_scan_station::config::{Parity, SerialConfig};
///
/// let serial = SerialConfig {
///     port: "/dev/ttyUSB1".to_string(),
///     baud_rate: 19200,
///     parity: Parity::Even,
///     ..SerialConfig::default()
/// };
/// assert_eq!(serial.timeout().as_millis(), 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device identifier.
    pub port: String,

    /// Line speed in bits per second.
    pub baud_rate: u32,

    /// Parity bit setting.
    pub parity: Parity,

    /// Number of stop bits (1 or 2).
    pub stop_bits: u8,

    /// Character size in bits (5 to 8).
    pub data_bits: u8,

    /// Time allowed for each request/response exchange, in milliseconds.
    ///
    /// Every transport operation blocks its caller for at most this long.
    pub timeout_ms: u64,

    /// Modbus unit id of the PLC.
    ///
    /// Whether the PLC answers on 0 or 1 is vendor-specific; the value is used
    /// exactly as configured.
    pub slave_id: u8,
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: 9600,
            parity: Parity::None,
            stop_bits: 1,
            data_bits: 8,
            timeout_ms: 500,
            slave_id: 1,
        }
    }
}

#[cfg(windows)]
fn default_port() -> String {
    "COM3".to_string()
}

#[cfg(not(windows))]
fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}
