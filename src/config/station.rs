// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Verification, completion handshake and master-data catalog settings

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::modbus::register_map::COMPLETION_SIGNAL;
use crate::scan::{ChildPartSpec, MatchPolicy};

/// Catalog of expected child parts, keyed by main part number
pub type Catalog = BTreeMap<String, Vec<ChildPartSpec>>;

/// Scan matching settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VerificationConfig {
    /// Whether expected parts may be scanned in any order
    pub policy: MatchPolicy,
}

/// Completion handshake written to the PLC once a unit is verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Register map signal carrying the completion flag
    pub signal: String,

    /// Value written when the unit is complete
    pub value: u16,

    /// Value written at the end of a pulse
    pub reset_value: u16,

    /// When set, the signal is reset to `reset_value` after this many
    /// milliseconds. When absent the PLC is expected to reset it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse_ms: Option<u64>,
}

impl CompletionConfig {
    pub fn pulse(&self) -> Option<Duration> {
        self.pulse_ms.map(Duration::from_millis)
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            signal: COMPLETION_SIGNAL.to_string(),
            value: 1,
            reset_value: 0,
            pulse_ms: None,
        }
    }
}
