// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use std::collections::HashSet;

use anyhow::{Context, Result};
use jsonschema::Validator;
use log::debug;

use super::Config;
use crate::modbus::register_map::RegisterMap;

const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line. It outputs the full JSON schema for the configuration
/// to stdout, formatted for readability.
///
/// # Example
///
/// ```bash
/// ./rust_scan_station --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Build a draft 2020-12 validator for the embedded configuration schema
pub(crate) fn schema_validator() -> Result<Validator> {
    let schema: serde_json::Value = serde_json::from_str(CONFIG_SCHEMA).with_context(|| {
        debug!("JSON schema string: {}", CONFIG_SCHEMA);
        "Failed to parse JSON schema"
    })?;

    let validator = jsonschema::draft202012::options()
        .should_validate_formats(true)
        .build(&schema)?;
    Ok(validator)
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **Register map**: non-empty, unique names and unique addresses
/// - **Completion signal**: must exist in the register map and be writable
/// - **Timing**: poll interval, failure threshold and serial timeout are non-zero
/// - **Serial framing**: data bits in 5..=8, stop bits 1 or 2
/// - **Catalog**: every main part lists at least one child part, part numbers
///   are unique within an entry, and sequence positions are not reused
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    let map = RegisterMap::from_table(&config.registers).context("Invalid register map")?;

    match map.get(&config.completion.signal) {
        None => anyhow::bail!(
            "Completion signal '{}' is not defined in the register map",
            config.completion.signal
        ),
        Some(spec) if !spec.access.is_writable() => anyhow::bail!(
            "Completion signal '{}' must be writable",
            config.completion.signal
        ),
        Some(_) => {}
    }

    if config.plc.poll_interval_ms == 0 {
        anyhow::bail!("Poll interval must be greater than zero");
    }
    if config.plc.failure_threshold == 0 {
        anyhow::bail!("Failure threshold must be greater than zero");
    }
    if config.serial.timeout_ms == 0 {
        anyhow::bail!("Serial timeout must be greater than zero");
    }
    if !(5..=8).contains(&config.serial.data_bits) {
        anyhow::bail!("Invalid data bits: {}", config.serial.data_bits);
    }
    if !(1..=2).contains(&config.serial.stop_bits) {
        anyhow::bail!("Invalid stop bits: {}", config.serial.stop_bits);
    }
    if config.serial.port.trim().is_empty() {
        anyhow::bail!("Serial port must not be empty");
    }

    for (main_part, parts) in &config.catalog {
        if parts.is_empty() {
            anyhow::bail!("Catalog entry '{}' has no child parts", main_part);
        }
        let mut numbers = HashSet::new();
        let mut positions = HashSet::new();
        for part in parts {
            if !numbers.insert(part.part_number.as_str()) {
                anyhow::bail!(
                    "Catalog entry '{}' lists part '{}' more than once",
                    main_part,
                    part.part_number
                );
            }
            if let Some(position) = part.expected_sequence_position {
                if !positions.insert(position) {
                    anyhow::bail!(
                        "Catalog entry '{}' reuses sequence position {}",
                        main_part,
                        position
                    );
                }
            }
        }
    }

    Ok(())
}
