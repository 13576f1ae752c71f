// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register map
//!
//! Static translation between the named station signals and the PLC holding
//! registers backing them. Every signal occupies exactly one 16-bit register
//! (LS/LSIS D-registers are accessed one word at a time), and addresses are
//! unique within a map.
//!
//! Addresses are deployment configuration: whether `D1` is wire address 0 or 1
//! depends on the PLC documentation, so the map never adjusts them.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signal written by the station once every expected part has been verified
pub const COMPLETION_SIGNAL: &str = "completion_signal";
/// Division word for the front / left-hand side
pub const FRONT_LH_DIVISION: &str = "front_lh_division";
/// Division word for the rear / right-hand side
pub const REAR_RH_DIVISION: &str = "rear_rh_division";

/// Maximum number of registers a single Modbus read may request
pub const MAX_REGISTERS_PER_READ: u16 = 125;

/// Direction in which the station may use a signal.
///
/// Holding registers are readable on the wire regardless of this setting, so
/// every signal is polled; `access` only restricts which signals the station is
/// allowed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Produced by the PLC, observed by the station
    #[default]
    Read,
    /// Produced by the station
    Write,
    /// Produced by the station and acknowledged/reset by the PLC
    ReadWrite,
}

impl Access {
    pub fn is_writable(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// One row of the `registers` configuration table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterEntry {
    /// Holding register address as sent on the wire
    pub address: u16,
    /// How the station uses the signal
    #[serde(default)]
    pub access: Access,
}

impl RegisterEntry {
    pub fn new(address: u16, access: Access) -> Self {
        Self { address, access }
    }
}

/// A named signal resolved to its holding register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSpec {
    pub name: String,
    pub address: u16,
    /// Always 1: signals never span several registers
    pub width: u16,
    pub access: Access,
}

impl RegisterSpec {
    pub fn new(name: impl Into<String>, address: u16, access: Access) -> Self {
        Self {
            name: name.into(),
            address,
            width: 1,
            access,
        }
    }
}

/// Run of consecutive register addresses that can be fetched in one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRun {
    /// First address of the run
    pub start: u16,
    /// Signal names in address order
    pub names: Vec<String>,
}

impl RegisterRun {
    /// Number of registers covered by the run
    pub fn count(&self) -> u16 {
        self.names.len() as u16
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterMapError {
    #[error("register map is empty")]
    Empty,
    #[error("signal names must not be empty")]
    EmptyName,
    #[error("signal '{0}' is defined more than once")]
    DuplicateName(String),
    #[error("signals '{first}' and '{second}' share register address {address}")]
    DuplicateAddress {
        address: u16,
        first: String,
        second: String,
    },
}

/// Validated set of register specifications, kept sorted by address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMap {
    specs: Vec<RegisterSpec>,
    by_name: HashMap<String, usize>,
}

impl RegisterMap {
    /// Build a map, rejecting blank names, duplicate names and duplicate
    /// addresses
    pub fn new(specs: impl IntoIterator<Item = RegisterSpec>) -> Result<Self, RegisterMapError> {
        let mut specs: Vec<RegisterSpec> = specs.into_iter().collect();
        if specs.is_empty() {
            return Err(RegisterMapError::Empty);
        }
        if specs.iter().any(|spec| spec.name.trim().is_empty()) {
            return Err(RegisterMapError::EmptyName);
        }
        specs.sort_by_key(|spec| spec.address);

        for pair in specs.windows(2) {
            if pair[0].address == pair[1].address {
                return Err(RegisterMapError::DuplicateAddress {
                    address: pair[0].address,
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }

        let mut by_name = HashMap::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            if by_name.insert(spec.name.clone(), index).is_some() {
                return Err(RegisterMapError::DuplicateName(spec.name.clone()));
            }
        }

        Ok(Self { specs, by_name })
    }

    /// Build a map from the `{name: {address, access}}` configuration table
    pub fn from_table(table: &BTreeMap<String, RegisterEntry>) -> Result<Self, RegisterMapError> {
        Self::new(
            table
                .iter()
                .map(|(name, entry)| RegisterSpec::new(name.clone(), entry.address, entry.access)),
        )
    }

    pub fn get(&self, name: &str) -> Option<&RegisterSpec> {
        self.by_name.get(name).map(|&index| &self.specs[index])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Specifications in ascending address order
    pub fn iter(&self) -> impl Iterator<Item = &RegisterSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Group the map into runs of contiguous addresses.
    ///
    /// A fully contiguous map yields a single batched read. Runs are capped at
    /// [`MAX_REGISTERS_PER_READ`] registers.
    pub fn contiguous_runs(&self) -> Vec<RegisterRun> {
        let mut runs: Vec<RegisterRun> = Vec::new();
        for spec in &self.specs {
            match runs.last_mut() {
                Some(run)
                    if run.count() < MAX_REGISTERS_PER_READ
                        && u32::from(run.start) + u32::from(run.count())
                            == u32::from(spec.address) =>
                {
                    run.names.push(spec.name.clone());
                }
                _ => runs.push(RegisterRun {
                    start: spec.address,
                    names: vec![spec.name.clone()],
                }),
            }
        }
        runs
    }
}

/// The station's default signal table
pub fn default_register_table() -> BTreeMap<String, RegisterEntry> {
    let mut table = BTreeMap::new();
    table.insert(
        COMPLETION_SIGNAL.to_string(),
        RegisterEntry::new(0, Access::ReadWrite),
    );
    table.insert(
        FRONT_LH_DIVISION.to_string(),
        RegisterEntry::new(1, Access::Read),
    );
    table.insert(
        REAR_RH_DIVISION.to_string(),
        RegisterEntry::new(2, Access::Read),
    );
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_one_contiguous_run() {
        let map = RegisterMap::from_table(&default_register_table()).unwrap();
        let runs = map.contiguous_runs();

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].start, 0);
        assert_eq!(
            runs[0].names,
            vec![COMPLETION_SIGNAL, FRONT_LH_DIVISION, REAR_RH_DIVISION]
        );
    }

    #[test]
    fn test_gaps_split_runs() {
        let map = RegisterMap::new(vec![
            RegisterSpec::new("d101", 101, Access::Read),
            RegisterSpec::new("d10", 10, Access::Read),
            RegisterSpec::new("d11", 11, Access::Write),
            RegisterSpec::new("d100", 100, Access::Read),
        ])
        .unwrap();

        let runs = map.contiguous_runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].start, 10);
        assert_eq!(runs[0].count(), 2);
        assert_eq!(runs[1].start, 100);
        assert_eq!(runs[1].names, vec!["d100", "d101"]);
    }

    #[test]
    fn test_runs_are_capped_at_modbus_limit() {
        let map = RegisterMap::new(
            (0..130u16).map(|address| RegisterSpec::new(format!("d{address}"), address, Access::Read)),
        )
        .unwrap();

        let runs = map.contiguous_runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].count(), MAX_REGISTERS_PER_READ);
        assert_eq!(runs[1].start, MAX_REGISTERS_PER_READ);
        assert_eq!(runs[1].count(), 5);
    }

    #[test]
    fn test_duplicate_address_is_rejected() {
        let result = RegisterMap::new(vec![
            RegisterSpec::new("a", 7, Access::Read),
            RegisterSpec::new("b", 7, Access::Write),
        ]);
        assert!(matches!(
            result,
            Err(RegisterMapError::DuplicateAddress { address: 7, .. })
        ));
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let result = RegisterMap::new(vec![
            RegisterSpec::new("a", 1, Access::Read),
            RegisterSpec::new("a", 2, Access::Read),
        ]);
        assert_eq!(result, Err(RegisterMapError::DuplicateName("a".to_string())));
    }

    #[test]
    fn test_empty_map_is_rejected() {
        assert_eq!(
            RegisterMap::new(Vec::new()),
            Err(RegisterMapError::Empty)
        );
    }

    #[test]
    fn test_blank_name_is_rejected() {
        for name in ["", "   "] {
            assert_eq!(
                RegisterMap::new(vec![
                    RegisterSpec::new(COMPLETION_SIGNAL, 0, Access::ReadWrite),
                    RegisterSpec::new(name, 1, Access::Read),
                ]),
                Err(RegisterMapError::EmptyName)
            );
        }
    }

    #[test]
    fn test_access_defaults_to_read() {
        let entry: RegisterEntry = serde_json::from_str(r#"{"address": 3}"#).unwrap();
        assert_eq!(entry.access, Access::Read);
        assert!(!Access::default().is_writable());
    }

    #[test]
    fn test_lookup_by_name() {
        let map = RegisterMap::from_table(&default_register_table()).unwrap();
        let spec = map.get(COMPLETION_SIGNAL).unwrap();
        assert_eq!(spec.address, 0);
        assert_eq!(spec.width, 1);
        assert!(spec.access.is_writable());
        assert!(!map.get(FRONT_LH_DIVISION).unwrap().access.is_writable());
        assert!(map.get("missing").is_none());
    }
}
