// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Scan verification state machine

use log::{debug, info, warn};
use tokio::sync::broadcast;

use super::{
    ChildPartSpec, CompletedUnit, MatchPolicy, ScanEvent, ScanResult, SessionError,
    VerificationSession,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Owner of the active [`VerificationSession`].
///
/// Every state change is published on a broadcast channel; sending never
/// blocks and succeeds whether or not anyone is subscribed.
#[derive(Debug)]
pub struct ScanVerifier {
    policy: MatchPolicy,
    session: Option<VerificationSession>,
    events: broadcast::Sender<ScanEvent>,
}

impl ScanVerifier {
    pub fn new(policy: MatchPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            policy,
            session: None,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Policy applied to sessions started from now on
    pub fn set_policy(&mut self, policy: MatchPolicy) {
        self.policy = policy;
    }

    /// Start verifying a new unit.
    ///
    /// Any existing session, complete or not, is discarded without an abort
    /// notification. An invalid expected set leaves the existing session
    /// untouched.
    pub fn start_session(
        &mut self,
        main_part_number: &str,
        expected_parts: Vec<ChildPartSpec>,
    ) -> Result<(), SessionError> {
        let session = VerificationSession::new(main_part_number, expected_parts, self.policy)?;
        if let Some(previous) = self.session.replace(session) {
            debug!(
                "Discarding session for '{}' ({}/{} parts OK)",
                previous.main_part_number(),
                previous.ok_count(),
                previous.expected_count()
            );
        }
        info!(
            "Verification session started for '{}' ({:?})",
            main_part_number, self.policy
        );
        Ok(())
    }

    /// Record one scanned barcode against the active session
    pub fn record_scan(&mut self, part_number: &str) -> Result<ScanResult, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NoActiveSession)?;
        let result = session.record(part_number);

        if result.is_ng() {
            warn!("Scan '{}' rejected: {:?}", part_number, result.verdict);
        } else {
            debug!("Scan '{}' matched: {:?}", part_number, result.verdict);
        }
        let _ = self.events.send(ScanEvent::PartScanned(result.clone()));

        if session.take_ready() {
            info!(
                "All {} parts verified for '{}'",
                session.expected_count(),
                session.main_part_number()
            );
            let _ = self.events.send(ScanEvent::SessionReady {
                main_part_number: session.main_part_number().to_string(),
            });
        }
        Ok(result)
    }

    /// False when no session is active
    pub fn is_session_complete(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(VerificationSession::is_complete)
    }

    /// Discard the active session. Returns whether a session was active.
    pub fn abort_session(&mut self) -> bool {
        match self.session.take() {
            Some(session) => {
                info!(
                    "Verification session for '{}' aborted",
                    session.main_part_number()
                );
                let _ = self.events.send(ScanEvent::SessionAborted {
                    main_part_number: session.main_part_number().to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Close a complete session and hand back its unit record.
    ///
    /// An incomplete session stays active.
    pub fn finish_session(&mut self) -> Result<CompletedUnit, SessionError> {
        let session = self.session.as_ref().ok_or(SessionError::NoActiveSession)?;
        if !session.is_complete() {
            return Err(SessionError::Incomplete {
                remaining: session.expected_count() - session.ok_count(),
            });
        }
        match self.session.take() {
            Some(session) => session.into_completed(),
            None => Err(SessionError::NoActiveSession),
        }
    }

    pub fn session(&self) -> Option<&VerificationSession> {
        self.session.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{PartStatus, ScanVerdict};

    fn expected() -> Vec<ChildPartSpec> {
        vec![
            ChildPartSpec::new("PART001", "Bracket"),
            ChildPartSpec::new("PART002", "Cover"),
            ChildPartSpec::new("PART003", "Screw kit"),
        ]
    }

    #[test]
    fn test_reference_scenario() {
        let mut verifier = ScanVerifier::new(MatchPolicy::AnyOrder);
        verifier.start_session("MAIN", expected()).unwrap();

        let first = verifier.record_scan("PART001").unwrap();
        assert!(first.matched);
        assert_eq!(
            verifier.session().unwrap().status_of("PART001"),
            Some(PartStatus::Ok)
        );
        assert!(!verifier.is_session_complete());

        let unknown = verifier.record_scan("PART999").unwrap();
        assert!(!unknown.matched);
        assert!(unknown.matched_spec.is_none());
        assert_eq!(verifier.session().unwrap().ok_count(), 1);
        assert!(!verifier.is_session_complete());

        verifier.record_scan("PART002").unwrap();
        verifier.record_scan("PART003").unwrap();
        assert!(verifier.is_session_complete());
    }

    #[test]
    fn test_duplicate_scan_never_double_counts() {
        let mut verifier = ScanVerifier::new(MatchPolicy::AnyOrder);
        verifier.start_session("MAIN", expected()).unwrap();

        verifier.record_scan("PART001").unwrap();
        let again = verifier.record_scan("PART001").unwrap();
        assert!(again.matched);
        assert_eq!(again.verdict, ScanVerdict::Duplicate);

        let session = verifier.session().unwrap();
        assert_eq!(session.ok_count(), 1);
        assert_eq!(session.scan_log().len(), 2);
        assert!(!verifier.is_session_complete());
    }

    #[test]
    fn test_scan_without_session_fails() {
        let mut verifier = ScanVerifier::new(MatchPolicy::AnyOrder);
        assert_eq!(
            verifier.record_scan("PART001").unwrap_err(),
            SessionError::NoActiveSession
        );
        assert!(!verifier.is_session_complete());
    }

    #[test]
    fn test_invalid_start_keeps_existing_session() {
        let mut verifier = ScanVerifier::new(MatchPolicy::AnyOrder);
        verifier.start_session("MAIN", expected()).unwrap();
        verifier.record_scan("PART001").unwrap();

        assert_eq!(
            verifier.start_session("OTHER", Vec::new()).unwrap_err(),
            SessionError::EmptyExpectedSet
        );
        let session = verifier.session().unwrap();
        assert_eq!(session.main_part_number(), "MAIN");
        assert_eq!(session.ok_count(), 1);
    }

    #[test]
    fn test_restart_discards_silently() {
        let mut verifier = ScanVerifier::new(MatchPolicy::AnyOrder);
        let mut events = verifier.subscribe();
        verifier.start_session("MAIN", expected()).unwrap();
        verifier.start_session("NEXT", expected()).unwrap();

        assert_eq!(verifier.session().unwrap().main_part_number(), "NEXT");
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_events_and_single_ready() {
        let mut verifier = ScanVerifier::new(MatchPolicy::AnyOrder);
        let mut events = verifier.subscribe();
        verifier
            .start_session("MAIN", vec![ChildPartSpec::new("PART001", "Bracket")])
            .unwrap();

        verifier.record_scan("PART001").unwrap();
        verifier.record_scan("PART001").unwrap();

        assert!(matches!(events.try_recv(), Ok(ScanEvent::PartScanned(_))));
        assert_eq!(
            events.try_recv().unwrap(),
            ScanEvent::SessionReady {
                main_part_number: "MAIN".to_string()
            }
        );
        assert!(matches!(events.try_recv(), Ok(ScanEvent::PartScanned(_))));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_abort_emits_event_and_clears() {
        let mut verifier = ScanVerifier::new(MatchPolicy::AnyOrder);
        let mut events = verifier.subscribe();
        verifier.start_session("MAIN", expected()).unwrap();

        assert!(verifier.abort_session());
        assert!(verifier.session().is_none());
        assert_eq!(
            events.try_recv().unwrap(),
            ScanEvent::SessionAborted {
                main_part_number: "MAIN".to_string()
            }
        );
        assert!(!verifier.abort_session());
    }

    #[test]
    fn test_finish_session() {
        let mut verifier = ScanVerifier::new(MatchPolicy::AnyOrder);
        assert_eq!(
            verifier.finish_session().unwrap_err(),
            SessionError::NoActiveSession
        );

        verifier.start_session("MAIN", expected()).unwrap();
        verifier.record_scan("PART001").unwrap();
        assert_eq!(
            verifier.finish_session().unwrap_err(),
            SessionError::Incomplete { remaining: 2 }
        );
        assert!(verifier.session().is_some());

        verifier.record_scan("PART002").unwrap();
        verifier.record_scan("PART003").unwrap();
        let unit = verifier.finish_session().unwrap();
        assert_eq!(unit.parts.len(), 3);
        assert!(verifier.session().is_none());
    }
}
