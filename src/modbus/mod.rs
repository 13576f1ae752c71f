// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module provides the Modbus RTU plumbing between the station and the
//! line PLC.
//!
//! ## Key Components
//!
//! - [`RegisterMap`]: named signals resolved to holding-register addresses
//! - [`ModbusTransport`] / [`RtuTransport`]: holding-register reads and writes
//!   over a serial link, with a closed [`TransportError`] set
//! - [`PlcEmulator`]: a Modbus server service standing in for the PLC on a
//!   bench
//!
//! ## Default Register Map
//!
//! | Signal              | Address | Access     |
//! |---------------------|---------|------------|
//! | `completion_signal` | 0       | read_write |
//! | `front_lh_division` | 1       | read       |
//! | `rear_rh_division`  | 2       | read       |
//!
//! Addresses are deployment configuration and must match the PLC register
//! documentation (LS/LSIS `D` words may be 0- or 1-based depending on the
//! model).

pub mod emulator;
pub mod register_map;
pub mod transport;

pub use emulator::PlcEmulator;
pub use register_map::{Access, RegisterEntry, RegisterMap, RegisterMapError, RegisterSpec};
pub use transport::{
    ModbusTransport, RtuTransport, SerialConnector, TransportConnector, TransportError,
};
