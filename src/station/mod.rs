// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Station orchestration
//!
//! The [`Station`] ties the scan verifier to the PLC data manager: it looks up
//! the expected parts of a unit, records scans, and once every part is OK
//! writes the completion signal and hands the unit record to a
//! [`CompletionSink`].
//!
//! A unit whose completion write failed stays pending; the operator retries
//! with [`Station::retry_completion`] or drops it with [`Station::abort_unit`].

pub mod completion;
pub mod master_data;

use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use thiserror::Error;

use crate::config::{CompletionConfig, Config};
use crate::plc::{ManagerError, PlcDataManager};
use crate::scan::{CompletedUnit, ScanResult, ScanVerifier, SessionError};

pub use completion::{CompletionSink, LogCompletionSink};
pub use master_data::{CatalogProvider, MasterDataProvider};

#[derive(Debug, Error)]
pub enum StationError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Plc(#[from] ManagerError),
    #[error("master data lookup failed: {0}")]
    MasterData(String),
    #[error("unit '{0}' is waiting for its completion signal")]
    CompletionPending(String),
    #[error("no completed unit is waiting for a completion signal")]
    NoPendingCompletion,
}

/// Where the current unit stands after a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    InProgress {
        ok_count: usize,
        expected_count: usize,
    },
    /// Completion signalled and unit handed to the sink
    Completed(CompletedUnit),
    /// Every part is OK but the completion write failed
    AwaitingSignal(ManagerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub result: ScanResult,
    pub outcome: UnitOutcome,
}

pub struct Station {
    plc: PlcDataManager,
    verifier: ScanVerifier,
    master_data: Arc<dyn MasterDataProvider>,
    sink: Arc<dyn CompletionSink>,
    completion: CompletionConfig,
    pending: Option<CompletedUnit>,
}

impl Station {
    pub fn new(
        plc: PlcDataManager,
        verifier: ScanVerifier,
        master_data: Arc<dyn MasterDataProvider>,
        sink: Arc<dyn CompletionSink>,
        completion: CompletionConfig,
    ) -> Self {
        Self {
            plc,
            verifier,
            master_data,
            sink,
            completion,
            pending: None,
        }
    }

    /// Station on the configured serial link, catalog and policy, logging
    /// completed units
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            PlcDataManager::from_config(config)?,
            ScanVerifier::new(config.verification.policy),
            Arc::new(CatalogProvider::new(config.catalog.clone())),
            Arc::new(LogCompletionSink),
            config.completion.clone(),
        ))
    }

    pub fn plc(&self) -> &PlcDataManager {
        &self.plc
    }

    pub fn plc_mut(&mut self) -> &mut PlcDataManager {
        &mut self.plc
    }

    pub fn verifier(&self) -> &ScanVerifier {
        &self.verifier
    }

    /// Unit verified but not yet signalled to the PLC
    pub fn pending_completion(&self) -> Option<&CompletedUnit> {
        self.pending.as_ref()
    }

    /// Begin verifying a new unit, returning the number of expected parts.
    ///
    /// An incomplete session is discarded.
    pub async fn start_unit(&mut self, main_part_number: &str) -> Result<usize, StationError> {
        if let Some(unit) = &self.pending {
            return Err(StationError::CompletionPending(
                unit.main_part_number.clone(),
            ));
        }
        let parts = self
            .master_data
            .expected_parts(main_part_number)
            .await
            .map_err(|err| StationError::MasterData(format!("{err:#}")))?
            .ok_or_else(|| SessionError::UnknownMainPart(main_part_number.to_string()))?;

        let count = parts.len();
        self.verifier.start_session(main_part_number, parts)?;
        Ok(count)
    }

    /// Record a scan and signal completion when it finishes the unit
    pub async fn scan(&mut self, part_number: &str) -> Result<ScanReport, StationError> {
        if let Some(unit) = &self.pending {
            return Err(StationError::CompletionPending(
                unit.main_part_number.clone(),
            ));
        }
        let result = self.verifier.record_scan(part_number)?;

        if !self.verifier.is_session_complete() {
            let (ok_count, expected_count) = self
                .verifier
                .session()
                .map(|session| (session.ok_count(), session.expected_count()))
                .unwrap_or_default();
            return Ok(ScanReport {
                result,
                outcome: UnitOutcome::InProgress {
                    ok_count,
                    expected_count,
                },
            });
        }

        let unit = self.verifier.finish_session()?;
        let outcome = self.complete(unit).await;
        Ok(ScanReport { result, outcome })
    }

    /// Write the completion signal again for the pending unit
    pub async fn retry_completion(&mut self) -> Result<UnitOutcome, StationError> {
        let unit = self
            .pending
            .take()
            .ok_or(StationError::NoPendingCompletion)?;
        info!(
            "Retrying completion signal for '{}'",
            unit.main_part_number
        );
        Ok(self.complete(unit).await)
    }

    /// Drop the current session or pending unit. Returns whether anything
    /// was dropped.
    pub fn abort_unit(&mut self) -> bool {
        let aborted_session = self.verifier.abort_session();
        let dropped_pending = match self.pending.take() {
            Some(unit) => {
                warn!(
                    "Unit '{}' dropped without completion signal",
                    unit.main_part_number
                );
                true
            }
            None => false,
        };
        aborted_session || dropped_pending
    }

    pub async fn shutdown(&mut self) {
        self.plc.shutdown().await;
    }

    async fn complete(&mut self, unit: CompletedUnit) -> UnitOutcome {
        if let Err(err) = self.signal_completion().await {
            warn!(
                "Completion signal for '{}' failed: {}",
                unit.main_part_number, err
            );
            self.pending = Some(unit);
            return UnitOutcome::AwaitingSignal(err);
        }

        info!("Completion signalled for '{}'", unit.main_part_number);
        if let Err(err) = self.sink.unit_completed(&unit).await {
            warn!(
                "Completion sink failed for '{}': {:#}",
                unit.main_part_number, err
            );
        }
        UnitOutcome::Completed(unit)
    }

    /// Write the completion value, then the reset value after the pulse width
    /// when one is configured. A failed reset is logged, not reported.
    async fn signal_completion(&self) -> Result<(), ManagerError> {
        let signal = self.completion.signal.as_str();
        self.plc.write_signal(signal, self.completion.value).await?;

        if let Some(pulse) = self.completion.pulse() {
            tokio::time::sleep(pulse).await;
            if let Err(err) = self
                .plc
                .write_signal(signal, self.completion.reset_value)
                .await
            {
                warn!("Failed to reset '{}' after pulse: {}", signal, err);
            }
        }
        Ok(())
    }
}
