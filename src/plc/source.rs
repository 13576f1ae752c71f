// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Sources of PLC signal values
//!
//! The poll loop is written once against [`SignalSource`]; whether values
//! come from the serial link or from the simulator is decided when the loop is
//! spawned.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::ManagerError;
use crate::modbus::{ModbusTransport, RegisterMap, RegisterSpec, TransportError};

#[async_trait]
pub trait SignalSource: Send {
    /// Read every signal of `map`
    async fn read_all(&mut self, map: &RegisterMap)
        -> Result<BTreeMap<String, u16>, TransportError>;

    /// Write one signal
    async fn write(&mut self, spec: &RegisterSpec, value: u16) -> Result<(), TransportError>;

    /// Force a value into the next snapshot
    fn set_override(&mut self, _name: &str, _value: u16) -> Result<(), ManagerError> {
        Err(ManagerError::NotSimulated)
    }

    async fn close(&mut self);

    fn is_simulated(&self) -> bool;
}

/// Signal source backed by the Modbus transport
pub struct HardwareSource {
    transport: Box<dyn ModbusTransport>,
    slave_id: u8,
}

impl HardwareSource {
    pub fn new(transport: Box<dyn ModbusTransport>, slave_id: u8) -> Self {
        Self {
            transport,
            slave_id,
        }
    }
}

#[async_trait]
impl SignalSource for HardwareSource {
    /// One request per contiguous run of addresses; any failed request fails
    /// the whole cycle.
    async fn read_all(
        &mut self,
        map: &RegisterMap,
    ) -> Result<BTreeMap<String, u16>, TransportError> {
        let mut values = BTreeMap::new();
        for run in map.contiguous_runs() {
            let words = self
                .transport
                .read_holding_registers(run.start, run.count(), self.slave_id)
                .await?;
            values.extend(run.names.into_iter().zip(words));
        }
        Ok(values)
    }

    async fn write(&mut self, spec: &RegisterSpec, value: u16) -> Result<(), TransportError> {
        self.transport
            .write_holding_register(spec.address, value, self.slave_id)
            .await
    }

    async fn close(&mut self) {
        self.transport.close().await;
    }

    fn is_simulated(&self) -> bool {
        false
    }
}
