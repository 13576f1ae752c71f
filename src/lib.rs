// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rust scan station library
//!
//! This library provides the core of a manufacturing scan station: PLC data
//! synchronization over Modbus RTU and verification of scanned child parts
//! against the bill of materials of a production unit.

pub mod config;
pub mod console;
pub mod daemon;
pub mod modbus;
pub mod plc;
pub mod scan;
pub mod station;
