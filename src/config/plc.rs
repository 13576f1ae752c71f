// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC synchronization settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the PLC data manager is brought up when the station starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    /// Open the serial link and start polling the PLC
    Hardware,
    /// Run the deterministic simulator instead of the serial link
    Simulation,
    /// Stay disconnected until the operator connects
    Idle,
}

/// Settings of the PLC poll loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcConfig {
    /// Interval between two poll cycles in milliseconds.
    pub poll_interval_ms: u64,

    /// Number of consecutive failed poll cycles after which the link is
    /// declared lost and polling stops.
    pub failure_threshold: u32,

    /// Startup behaviour of the manager.
    pub mode: StartupMode,
}

impl PlcConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            failure_threshold: 3,
            mode: StartupMode::Hardware,
        }
    }
}
