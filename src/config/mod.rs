// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the scan station
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings for the station. The configuration is backed by a
//! YAML file and validated against a JSON schema for robustness.
//!
//! ## Configuration Structure
//!
//! The station's configuration is organized as a nested structure with sections:
//! - `serial`: Modbus RTU serial link to the PLC
//! - `plc`: Poll cadence, failure threshold and startup mode
//! - `registers`: Named signals and the holding registers backing them
//! - `verification`: Scan matching policy
//! - `completion`: Completion handshake written back to the PLC
//! - `catalog`: Expected child parts per main part number
//!
//! ## Usage
//!
//! ```no_run
//! use rust_scan_station::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("/dev/ttyUSB1".to_string()), // Serial port
//!     Some(19200),                      // Baud rate
//!     Some(2),                          // Slave id
//!     None,                             // Startup mode
//! );
//!
//! println!("PLC link: {} @ {}", config.serial.port, config.serial.baud_rate);
//! ```

pub mod plc;
pub mod serial;
pub mod station;
pub mod utils;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::modbus::register_map::{default_register_table, RegisterEntry, RegisterMap};

pub use plc::{PlcConfig, StartupMode};
pub use serial::{Parity, SerialConfig};
pub use station::{Catalog, CompletionConfig, VerificationConfig};
pub use utils::{output_config_schema, validate_specific_rules};

/// Root configuration structure for the scan station.
///
/// # Default Values
///
/// Each section uses default values when not explicitly specified in the
/// configuration file, so a file containing only `serial.port` is enough to
/// run against real hardware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Serial link to the PLC.
    #[serde(default)]
    pub serial: SerialConfig,

    /// PLC poll loop settings.
    #[serde(default)]
    pub plc: PlcConfig,

    /// Register map as a `{name: {address, access}}` table.
    ///
    /// Addresses are authoritative deployment configuration and must be taken
    /// from the PLC register documentation.
    #[serde(default = "default_register_table")]
    pub registers: BTreeMap<String, RegisterEntry>,

    /// Scan matching policy.
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Completion handshake.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Expected child parts per main part number.
    #[serde(default)]
    pub catalog: Catalog,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            plc: PlcConfig::default(),
            registers: default_register_table(),
            verification: VerificationConfig::default(),
            completion: CompletionConfig::default(),
            catalog: Catalog::new(),
        }
    }
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        // First step: convert YAML to a generic Value
        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;

        // Convert to JSON Value for validation
        let json_value = serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })?;

        let validator = utils::schema_validator()?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Validate an in-memory configuration with the same rules as [`Config::from_file`]
    pub fn validate(&self) -> Result<()> {
        let json_value =
            serde_json::to_value(self).context("Failed to convert configuration to JSON")?;
        let validator = utils::schema_validator()?;
        if let Err(error) = validator.validate(&json_value) {
            anyhow::bail!("Configuration validation failed: {}", error);
        }
        validate_specific_rules(self)
    }

    /// Resolve the `registers` table into a [`RegisterMap`]
    pub fn register_map(&self) -> Result<RegisterMap> {
        RegisterMap::from_table(&self.registers).context("Invalid register map")
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only values explicitly provided override the existing configuration.
    ///
    /// # Parameters
    ///
    /// * `port` - Serial device of the PLC link
    /// * `baud_rate` - Line speed of the PLC link
    /// * `slave_id` - Modbus unit id of the PLC
    /// * `mode` - Startup mode of the PLC data manager
    pub fn apply_args(
        &mut self,
        port: Option<String>,
        baud_rate: Option<u32>,
        slave_id: Option<u8>,
        mode: Option<StartupMode>,
    ) {
        if let Some(port) = port {
            debug!("Overriding serial port from command line: {}", port);
            self.serial.port = port;
        }
        if let Some(baud_rate) = baud_rate {
            debug!("Overriding baud rate from command line: {}", baud_rate);
            self.serial.baud_rate = baud_rate;
        }
        if let Some(slave_id) = slave_id {
            debug!("Overriding slave id from command line: {}", slave_id);
            self.serial.slave_id = slave_id;
        }
        if let Some(mode) = mode {
            debug!("Overriding startup mode from command line: {:?}", mode);
            self.plc.mode = mode;
        }
    }
}
