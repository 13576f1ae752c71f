// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Verification session of one production unit

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{
    ChildPartSpec, CompletedUnit, MatchPolicy, PartStatus, ScanResult, ScanVerdict, SessionError,
};

/// Expected parts, their status and the scan log of one production unit.
///
/// Expected parts keep the order they were supplied in. The scan log is
/// append-only and ordered by arrival.
#[derive(Debug, Clone)]
pub struct VerificationSession {
    main_part_number: String,
    policy: MatchPolicy,
    expected: Vec<ChildPartSpec>,
    index: HashMap<String, usize>,
    status: Vec<PartStatus>,
    scan_log: Vec<ScanResult>,
    started_at: DateTime<Utc>,
    ready_emitted: bool,
}

impl VerificationSession {
    /// Open a session with every expected part `Pending`
    pub fn new(
        main_part_number: impl Into<String>,
        expected_parts: Vec<ChildPartSpec>,
        policy: MatchPolicy,
    ) -> Result<Self, SessionError> {
        if expected_parts.is_empty() {
            return Err(SessionError::EmptyExpectedSet);
        }

        let mut index = HashMap::with_capacity(expected_parts.len());
        for (position, part) in expected_parts.iter().enumerate() {
            if index.insert(part.part_number.clone(), position).is_some() {
                return Err(SessionError::DuplicateExpectedPart(part.part_number.clone()));
            }
        }

        Ok(Self {
            main_part_number: main_part_number.into(),
            policy,
            status: vec![PartStatus::Pending; expected_parts.len()],
            expected: expected_parts,
            index,
            scan_log: Vec::new(),
            started_at: Utc::now(),
            ready_emitted: false,
        })
    }

    /// Classify a scan, update the part status and append it to the log
    pub fn record(&mut self, part_number: &str) -> ScanResult {
        let (matched, matched_spec, verdict) = match self.index.get(part_number).copied() {
            None => (false, None, ScanVerdict::NotExpected),
            Some(slot) if self.status[slot] == PartStatus::Ok => {
                (true, Some(self.expected[slot].clone()), ScanVerdict::Duplicate)
            }
            Some(slot) if !self.is_turn_of(slot) => {
                self.status[slot] = PartStatus::Ng;
                (false, None, ScanVerdict::OutOfOrder)
            }
            Some(slot) => {
                self.status[slot] = PartStatus::Ok;
                (true, Some(self.expected[slot].clone()), ScanVerdict::Accepted)
            }
        };

        let result = ScanResult {
            part_number_scanned: part_number.to_string(),
            matched,
            matched_spec,
            verdict,
            timestamp: Utc::now(),
        };
        self.scan_log.push(result.clone());
        result
    }

    /// Under the sequential policy a positioned part is due once every part
    /// with a lower position is OK. Unpositioned parts are always due.
    fn is_turn_of(&self, slot: usize) -> bool {
        if self.policy == MatchPolicy::AnyOrder {
            return true;
        }
        let Some(position) = self.expected[slot].expected_sequence_position else {
            return true;
        };
        self.expected
            .iter()
            .zip(&self.status)
            .filter(|(part, _)| matches!(part.expected_sequence_position, Some(p) if p < position))
            .all(|(_, status)| *status == PartStatus::Ok)
    }

    /// True iff every expected part is OK
    pub fn is_complete(&self) -> bool {
        self.status.iter().all(|status| *status == PartStatus::Ok)
    }

    /// Mark the ready notification as sent; returns `false` if it already was
    pub(crate) fn take_ready(&mut self) -> bool {
        if self.ready_emitted || !self.is_complete() {
            return false;
        }
        self.ready_emitted = true;
        true
    }

    pub fn main_part_number(&self) -> &str {
        &self.main_part_number
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn expected_parts(&self) -> &[ChildPartSpec] {
        &self.expected
    }

    pub fn scan_log(&self) -> &[ScanResult] {
        &self.scan_log
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status_of(&self, part_number: &str) -> Option<PartStatus> {
        self.index.get(part_number).map(|&slot| self.status[slot])
    }

    /// Expected parts paired with their current status
    pub fn per_part_status(&self) -> impl Iterator<Item = (&ChildPartSpec, PartStatus)> {
        self.expected.iter().zip(self.status.iter().copied())
    }

    pub fn ok_count(&self) -> usize {
        self.status
            .iter()
            .filter(|status| **status == PartStatus::Ok)
            .count()
    }

    pub fn expected_count(&self) -> usize {
        self.expected.len()
    }

    /// Next part the operator should scan, lowest sequence position first
    pub fn next_expected(&self) -> Option<&ChildPartSpec> {
        self.expected
            .iter()
            .zip(&self.status)
            .filter(|(_, status)| **status != PartStatus::Ok)
            .min_by_key(|(part, _)| part.expected_sequence_position.unwrap_or(u32::MAX))
            .map(|(part, _)| part)
    }

    /// Close a complete session into its unit record
    pub fn into_completed(self) -> Result<CompletedUnit, SessionError> {
        if !self.is_complete() {
            return Err(SessionError::Incomplete {
                remaining: self.expected_count() - self.ok_count(),
            });
        }
        Ok(CompletedUnit {
            main_part_number: self.main_part_number,
            parts: self.expected,
            scan_log: self.scan_log,
            started_at: self.started_at,
            completed_at: Utc::now(),
        })
    }
}
