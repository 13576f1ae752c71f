// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Hand-off of verified units to downstream services (labelling, traceability)

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;

use crate::scan::CompletedUnit;

/// Receives every unit once its completion has been signalled to the PLC
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn unit_completed(&self, unit: &CompletedUnit) -> Result<()>;
}

/// Sink writing the unit record as a JSON log line
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCompletionSink;

#[async_trait]
impl CompletionSink for LogCompletionSink {
    async fn unit_completed(&self, unit: &CompletedUnit) -> Result<()> {
        let record = serde_json::to_string(unit).context("Failed to serialize unit record")?;
        info!("Unit completed: {}", record);
        Ok(())
    }
}
