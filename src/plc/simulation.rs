// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Deterministic PLC simulator
//!
//! Each poll cycle advances a tick counter starting at 1:
//! - read-only signals report the tick (wrapping at 65536)
//! - writable signals hold the last value written by the station, 0 initially
//! - an override replaces the value of its signal in the next cycle only

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use log::debug;

use super::source::SignalSource;
use super::ManagerError;
use crate::modbus::{RegisterMap, RegisterSpec, TransportError};

#[derive(Debug, Default)]
pub struct SimulatedPlc {
    tick: u64,
    bank: HashMap<String, u16>,
    overrides: HashMap<String, u16>,
}

impl SimulatedPlc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cycles generated so far
    pub fn tick(&self) -> u64 {
        self.tick
    }
}

#[async_trait]
impl SignalSource for SimulatedPlc {
    async fn read_all(
        &mut self,
        map: &RegisterMap,
    ) -> Result<BTreeMap<String, u16>, TransportError> {
        self.tick += 1;
        let counter = self.tick as u16;

        let values = map
            .iter()
            .map(|spec| {
                let value = match self.overrides.get(&spec.name) {
                    Some(forced) => *forced,
                    None if spec.access.is_writable() => {
                        self.bank.get(&spec.name).copied().unwrap_or(0)
                    }
                    None => counter,
                };
                (spec.name.clone(), value)
            })
            .collect();
        self.overrides.clear();
        Ok(values)
    }

    async fn write(&mut self, spec: &RegisterSpec, value: u16) -> Result<(), TransportError> {
        debug!("Simulated write of {} to '{}'", value, spec.name);
        self.bank.insert(spec.name.clone(), value);
        Ok(())
    }

    fn set_override(&mut self, name: &str, value: u16) -> Result<(), ManagerError> {
        debug!("Simulated override of '{}' to {}", name, value);
        self.overrides.insert(name.to_string(), value);
        Ok(())
    }

    async fn close(&mut self) {}

    fn is_simulated(&self) -> bool {
        true
    }
}
