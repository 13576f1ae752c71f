// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC data synchronization
//!
//! The [`PlcDataManager`] keeps an up to date [`PlcSnapshot`] of the PLC
//! signals by polling them on a fixed cadence, and forwards signal writes from
//! the rest of the station.
//!
//! ## Architecture
//!
//! The poll loop runs as a spawned task that exclusively owns a
//! [`SignalSource`]: either a [`HardwareSource`] wrapping the Modbus RTU
//! transport, or a [`SimulatedPlc`] fabricating deterministic values. Because
//! writes and stop requests travel to that task as commands, serial bus access
//! is serialised and an in-flight frame is never interrupted.
//!
//! ```text
//! ┌──────────────┐  commands (mpsc)   ┌───────────┐     ┌──────────────┐
//! │PlcDataManager│ ─────────────────> │ poll loop │ ──> │ SignalSource │
//! │              │ <── watch ──────── │  (task)   │     └──────────────┘
//! └──────────────┘   snapshot/state   └───────────┘
//!                         │ broadcast
//!                         v
//!                 LinkLost / LinkRestored / SnapshotUpdated
//! ```
//!
//! ## Connection states
//!
//! `Disconnected --connect()--> Connecting --> Connected`, back to
//! `Disconnected` after `failure_threshold` consecutive failed poll cycles or
//! on `disconnect()`. `enable_simulation()` leads to `SimulatedConnected`,
//! which is left only through `disable_simulation()` or `disconnect()`.

pub mod manager;
pub mod simulation;
pub mod snapshot;
pub mod source;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::modbus::TransportError;

pub use manager::PlcDataManager;
pub use simulation::SimulatedPlc;
pub use snapshot::PlcSnapshot;
pub use source::{HardwareSource, SignalSource};

/// Link state of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    SimulatedConnected,
}

impl ConnectionState {
    /// Whether snapshots are being produced
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::SimulatedConnected
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::SimulatedConnected => "simulated",
        };
        f.write_str(label)
    }
}

/// Notifications published by the manager
#[derive(Debug, Clone)]
pub enum PlcEvent {
    /// Too many consecutive poll failures, polling stopped
    LinkLost,
    /// A connection succeeded after a `LinkLost`
    LinkRestored,
    SnapshotUpdated(Arc<PlcSnapshot>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("PLC is not connected")]
    NotConnected,
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),
    #[error("signal '{0}' is read-only")]
    ReadOnlySignal(String),
    #[error("simulation is not active")]
    NotSimulated,
    #[error("simulation is active, disable it first")]
    SimulationActive,
    #[error(transparent)]
    Transport(#[from] TransportError),
}
