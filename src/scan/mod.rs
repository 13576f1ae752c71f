// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Scan verification
//!
//! This module decides, scan by scan, whether the child parts of a production
//! unit match the expected bill of materials and when the unit may be signalled
//! complete to the PLC.
//!
//! ## Components
//!
//! - [`VerificationSession`]: expected parts, per-part status and the
//!   append-only scan log of one production unit
//! - [`ScanVerifier`]: owner of the active session, publishing [`ScanEvent`]s
//!   to any number of subscribers
//!
//! Matching is exact, case-sensitive string equality. The verifier never talks
//! to the PLC: a [`ScanEvent::SessionReady`] notification is emitted once per
//! session and the orchestrating layer decides what to write.
//!
//! ## Example
//!
//! ```
//! use rust_scan_station::scan::{ChildPartSpec, MatchPolicy, ScanVerifier};
//!
//! let mut verifier = ScanVerifier::new(MatchPolicy::AnyOrder);
//! verifier
//!     .start_session(
//!         "MAIN-01",
//!         vec![
//!             ChildPartSpec::new("PART001", "Bracket"),
//!             ChildPartSpec::new("PART002", "Cover"),
//!         ],
//!     )
//!     .unwrap();
//!
//! assert!(verifier.record_scan("PART002").unwrap().matched);
//! assert!(!verifier.record_scan("PART999").unwrap().matched);
//! assert!(!verifier.is_session_complete());
//! verifier.record_scan("PART001").unwrap();
//! assert!(verifier.is_session_complete());
//! ```

pub mod session;
pub mod verifier;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use session::VerificationSession;
pub use verifier::ScanVerifier;

/// A child part expected on a production unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildPartSpec {
    /// Barcode content identifying the part
    pub part_number: String,
    /// Human readable designation
    #[serde(default)]
    pub part_name: String,
    /// Position of the part in the scanning sequence, only enforced by
    /// [`MatchPolicy::Sequential`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_sequence_position: Option<u32>,
}

impl ChildPartSpec {
    pub fn new(part_number: impl Into<String>, part_name: impl Into<String>) -> Self {
        Self {
            part_number: part_number.into(),
            part_name: part_name.into(),
            expected_sequence_position: None,
        }
    }

    pub fn with_position(mut self, position: u32) -> Self {
        self.expected_sequence_position = Some(position);
        self
    }
}

/// Verification status of one expected part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartStatus {
    Pending,
    Ok,
    Ng,
}

/// How a scan was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanVerdict {
    /// First match of a pending part
    Accepted,
    /// Match of a part that was already OK; informational only
    Duplicate,
    /// No expected part carries this number
    NotExpected,
    /// Expected part scanned before its sequence position came up
    OutOfOrder,
}

/// Ordering constraint applied to scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Expected parts may be scanned in any order
    #[default]
    AnyOrder,
    /// Parts carrying an `expected_sequence_position` must be scanned in
    /// ascending position order
    Sequential,
}

/// Outcome of a single scan, appended to the session log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub part_number_scanned: String,
    pub matched: bool,
    /// Present iff `matched`
    pub matched_spec: Option<ChildPartSpec>,
    pub verdict: ScanVerdict,
    pub timestamp: DateTime<Utc>,
}

impl ScanResult {
    /// Whether the scan must be reported NG to the operator
    pub fn is_ng(&self) -> bool {
        !self.matched
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("expected part list is empty")]
    EmptyExpectedSet,
    #[error("part '{0}' is listed more than once")]
    DuplicateExpectedPart(String),
    #[error("no verification session is active")]
    NoActiveSession,
    #[error("session is not complete: {remaining} part(s) still pending")]
    Incomplete { remaining: usize },
    #[error("main part '{0}' has no master data")]
    UnknownMainPart(String),
}

/// Notifications published by the [`ScanVerifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    PartScanned(ScanResult),
    /// Every expected part is OK; emitted once per session
    SessionReady { main_part_number: String },
    SessionAborted { main_part_number: String },
}

/// Record of a fully verified production unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedUnit {
    pub main_part_number: String,
    pub parts: Vec<ChildPartSpec>,
    pub scan_log: Vec<ScanResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}
