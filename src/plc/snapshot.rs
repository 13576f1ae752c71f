// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Immutable picture of the PLC signals produced by one successful poll cycle.
///
/// Snapshots are shared behind an `Arc` and replaced as a whole by the next
/// cycle. `sequence` increases by one per cycle; sequence 0 is reserved for
/// the "not yet connected" sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlcSnapshot {
    pub sequence: u64,
    /// Time of the poll cycle, `None` for the sentinel
    pub timestamp: Option<DateTime<Utc>>,
    pub connected: bool,
    pub values: BTreeMap<String, u16>,
}

impl PlcSnapshot {
    /// Sentinel returned before the first successful poll
    pub fn not_connected() -> Self {
        Self {
            sequence: 0,
            timestamp: None,
            connected: false,
            values: BTreeMap::new(),
        }
    }

    pub fn new(sequence: u64, values: BTreeMap<String, u16>) -> Self {
        Self {
            sequence,
            timestamp: Some(Utc::now()),
            connected: true,
            values,
        }
    }

    /// Copy of this snapshot flagged as no longer connected, keeping the last
    /// known values
    pub fn disconnected(&self) -> Self {
        Self {
            connected: false,
            ..self.clone()
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.sequence == 0
    }

    pub fn get(&self, name: &str) -> Option<u16> {
        self.values.get(name).copied()
    }
}

impl Default for PlcSnapshot {
    fn default() -> Self {
        Self::not_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel() {
        let snapshot = PlcSnapshot::default();
        assert!(snapshot.is_sentinel());
        assert!(!snapshot.connected);
        assert!(snapshot.timestamp.is_none());
        assert!(snapshot.values.is_empty());
    }

    #[test]
    fn test_disconnected_keeps_values() {
        let values = BTreeMap::from([("front_lh_division".to_string(), 3)]);
        let snapshot = PlcSnapshot::new(7, values);
        let stale = snapshot.disconnected();

        assert!(snapshot.connected);
        assert!(!stale.connected);
        assert_eq!(stale.sequence, 7);
        assert_eq!(stale.get("front_lh_division"), Some(3));
        assert_eq!(stale.get("missing"), None);
    }
}
