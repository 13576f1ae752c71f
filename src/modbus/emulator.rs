// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bench PLC emulator
//!
//! A Modbus server service exposing a holding-register bank laid out from a
//! [`RegisterMap`]. Served over a serial port (or one end of a virtual null
//! modem pair), it lets the station run end to end without the line PLC.
//!
//! Only the functions the station uses are implemented: read holding
//! registers, write single register and write multiple registers. Any other
//! function code is answered with `IllegalFunction`, and addresses outside the
//! bank with `IllegalDataAddress`.

use std::collections::HashMap;
use std::future;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error};
use tokio_modbus::prelude::*;

use super::register_map::RegisterMap;

/// Holding-register bank answering Modbus requests like the line PLC would
#[derive(Debug, Clone)]
pub struct PlcEmulator {
    holding_registers: Arc<Mutex<HashMap<u16, u16>>>,
}

impl PlcEmulator {
    /// Create a bank with one zeroed register per signal of `map`
    pub fn new(map: &RegisterMap) -> Self {
        let holding_registers = map.iter().map(|spec| (spec.address, 0)).collect();
        Self {
            holding_registers: Arc::new(Mutex::new(holding_registers)),
        }
    }

    /// Current value of a register, `None` outside the bank
    pub fn register(&self, address: u16) -> Option<u16> {
        self.registers().ok()?.get(&address).copied()
    }

    /// Set a register from the PLC side. Returns `false` outside the bank.
    pub fn set_register(&self, address: u16, value: u16) -> bool {
        match self.registers() {
            Ok(mut registers) => match registers.get_mut(&address) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    fn registers(&self) -> Result<MutexGuard<'_, HashMap<u16, u16>>, ExceptionCode> {
        self.holding_registers.lock().map_err(|_| {
            error!("EMULATOR: register bank lock poisoned");
            ExceptionCode::ServerDeviceFailure
        })
    }
}

impl tokio_modbus::server::Service for PlcEmulator {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("EMULATOR: {req:?}");
        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => self
                .registers()
                .and_then(|registers| register_read(&registers, addr, cnt))
                .map(Response::ReadHoldingRegisters),
            Request::WriteSingleRegister(addr, value) => self
                .registers()
                .and_then(|mut registers| {
                    register_write(&mut registers, addr, std::slice::from_ref(&value))
                })
                .map(|_| Response::WriteSingleRegister(addr, value)),
            Request::WriteMultipleRegisters(addr, values) => self
                .registers()
                .and_then(|mut registers| register_write(&mut registers, addr, &values))
                .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16)),
            _ => {
                error!("EMULATOR: Exception::IllegalFunction - unsupported request: {req:?}");
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(res)
    }
}

fn register_read(
    registers: &HashMap<u16, u16>,
    addr: u16,
    cnt: u16,
) -> Result<Vec<u16>, ExceptionCode> {
    (0..cnt)
        .map(|offset| {
            addr.checked_add(offset)
                .and_then(|reg_addr| registers.get(&reg_addr).copied())
                .ok_or_else(|| {
                    error!("EMULATOR: Exception::IllegalDataAddress at {addr}+{offset}");
                    ExceptionCode::IllegalDataAddress
                })
        })
        .collect()
}

/// All addresses are checked before any register is changed
fn register_write(
    registers: &mut HashMap<u16, u16>,
    addr: u16,
    values: &[u16],
) -> Result<(), ExceptionCode> {
    let in_bank = (0..values.len()).all(|offset| {
        u16::try_from(offset)
            .ok()
            .and_then(|offset| addr.checked_add(offset))
            .is_some_and(|reg_addr| registers.contains_key(&reg_addr))
    });
    if !in_bank {
        error!("EMULATOR: Exception::IllegalDataAddress writing {} register(s) at {addr}", values.len());
        return Err(ExceptionCode::IllegalDataAddress);
    }

    for (offset, value) in values.iter().enumerate() {
        registers.insert(addr + offset as u16, *value);
    }
    Ok(())
}
