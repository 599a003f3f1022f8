//! A lecturer's scanner.
//!
//! The camera delivers the same QR code on many consecutive frames. The
//! station takes the first one and drops the rest: [`ScanStation::begin`]
//! closes the gate with a compare-and-set before any `.await`, so two frames
//! can never both start a cycle. The gate stays closed after the outcome is
//! known and only reopens when the lecturer dismisses it ("scan next"), the
//! station is torn down, or the cycle is dropped without reporting.
//!
//! ```text
//! Idle --begin--> Processing --cycle done--> Reporting(outcome) --dismiss--> Idle
//!   ^                                                                         |
//!   +------------------------------- teardown (any phase) --------------------+
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use uuid::Uuid;

use crate::verifier::{ScanContext, ScanOutcome, Verifier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ScanPhase {
    Idle,
    Processing,
    Reporting(ScanOutcome),
}

pub struct ScanStation {
    verifier: Verifier,
    lecturer_id: Uuid,
    gate: AtomicBool,
    generation: AtomicU64,
    phase: Mutex<ScanPhase>,
}

impl ScanStation {
    pub fn new(verifier: Verifier, lecturer_id: Uuid) -> Arc<Self> {
        Arc::new(Self {
            verifier,
            lecturer_id,
            gate: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            phase: Mutex::new(ScanPhase::Idle),
        })
    }

    pub fn phase(&self) -> ScanPhase {
        self.lock_phase().clone()
    }

    /// Claims the station for one scanned payload. Returns `None` when another
    /// scan is being processed or its outcome has not been dismissed yet.
    pub fn begin(self: &Arc<Self>, raw: impl Into<String>, session_id: Option<Uuid>) -> Option<ScanCycle> {
        let mut phase = self.lock_phase();
        if self
            .gate
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("Dropped frame for lecturer {}: station busy", self.lecturer_id);
            return None;
        }
        let generation = self.generation.load(Ordering::Acquire);
        *phase = ScanPhase::Processing;
        drop(phase);
        Some(ScanCycle {
            station: self.clone(),
            raw: raw.into(),
            context: ScanContext {
                lecturer_id: self.lecturer_id,
                session_id,
            },
            generation,
            finished: false,
        })
    }

    /// `begin` followed by running the cycle.
    pub async fn scan(self: &Arc<Self>, raw: impl Into<String>, session_id: Option<Uuid>) -> Option<ScanOutcome> {
        let cycle = self.begin(raw, session_id)?;
        Some(cycle.run().await)
    }

    /// Clears a reported outcome and accepts the next scan. Does nothing
    /// while a scan is still being processed.
    pub fn dismiss(&self) -> bool {
        let mut phase = self.lock_phase();
        if !matches!(*phase, ScanPhase::Reporting(_)) {
            return false;
        }
        *phase = ScanPhase::Idle;
        self.gate.store(false, Ordering::Release);
        true
    }

    /// Resets the station as if freshly created. A cycle still in flight keeps
    /// running against the ledger, but its outcome is thrown away.
    pub fn teardown(&self) {
        let mut phase = self.lock_phase();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *phase = ScanPhase::Idle;
        self.gate.store(false, Ordering::Release);
        log::debug!("Tore down station of lecturer {}", self.lecturer_id);
    }

    fn lock_phase(&self) -> MutexGuard<'_, ScanPhase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish(&self, generation: u64, outcome: &ScanOutcome) -> bool {
        let mut phase = self.lock_phase();
        if self.generation.load(Ordering::Acquire) != generation {
            log::debug!(
                "Discarded late outcome for lecturer {}: {:?}",
                self.lecturer_id,
                outcome
            );
            return false;
        }
        *phase = ScanPhase::Reporting(outcome.clone());
        true
    }

    fn abandon(&self, generation: u64) {
        let mut phase = self.lock_phase();
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        *phase = ScanPhase::Idle;
        self.gate.store(false, Ordering::Release);
        log::warn!("Scan cycle of lecturer {} abandoned before its outcome", self.lecturer_id);
    }
}

/// One claimed scan. Holds the station's gate until its outcome is dismissed.
///
/// A cycle dropped before it reports (never run, cancelled mid-write, or
/// lost with a panicking task) returns the station to `Idle`.
pub struct ScanCycle {
    station: Arc<ScanStation>,
    raw: String,
    context: ScanContext,
    generation: u64,
    finished: bool,
}

impl ScanCycle {
    pub async fn run(mut self) -> ScanOutcome {
        let outcome = self.station.verifier.verify(&self.raw, &self.context).await;
        self.station.finish(self.generation, &outcome);
        self.finished = true;
        outcome
    }
}

impl Drop for ScanCycle {
    fn drop(&mut self) {
        if !self.finished {
            self.station.abandon(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::credential::{CredentialGenerator, StudentIdentity};
    use crate::ledger::MemoryLedger;
    use crate::models::{NewSession, SessionStatus};
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        clock: Arc<ManualClock>,
        station: Arc<ScanStation>,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()));
        let ledger = Arc::new(MemoryLedger::with_clock(clock.clone()));
        let lecturer = Uuid::new_v4();
        let course = ledger.add_course(lecturer, "Distributed Systems", "CS452").await;
        ledger
            .add_session(
                NewSession {
                    course_id: course.id,
                    lecturer_id: lecturer,
                    week: 5,
                    date: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
                    time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                },
                SessionStatus::Active,
            )
            .await;
        let verifier = Verifier::new(ledger.clone(), clock.clone());
        Fixture {
            station: ScanStation::new(verifier, lecturer),
            ledger,
            clock,
        }
    }

    fn token(clock: &Arc<ManualClock>, student: &str) -> String {
        let clock: Arc<dyn Clock> = clock.clone();
        CredentialGenerator::new(
            StudentIdentity {
                student_id: student.to_string(),
                name: Some(format!("Student {}", student)),
                email: None,
            },
            clock,
        )
        .issue()
        .unwrap()
    }

    #[tokio::test]
    async fn second_frame_before_any_await_is_dropped() {
        let fx = fixture().await;
        let raw = token(&fx.clock, "S1");

        let first = fx.station.begin(raw.clone(), None);
        let second = fx.station.begin(raw, None);
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(fx.station.phase(), ScanPhase::Processing);

        assert!(first.unwrap().run().await.is_success());
        assert_eq!(fx.ledger.record_writes(), 1);
    }

    #[tokio::test]
    async fn frames_racing_an_inflight_write_are_dropped() {
        let fx = fixture().await;
        let gate = fx.ledger.gate_writes().await;
        let raw = token(&fx.clock, "S1");

        let station = fx.station.clone();
        let first_raw = raw.clone();
        let first = tokio::spawn(async move { station.scan(first_raw, None).await });
        while fx.ledger.record_writes() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(fx.station.scan(raw.clone(), None).await, None);
        assert!(!fx.station.dismiss());

        gate.add_permits(1);
        let outcome = first.await.unwrap().unwrap();
        assert!(outcome.is_success());
        assert_eq!(fx.ledger.record_writes(), 1);
        assert_eq!(fx.ledger.records().await.len(), 1);
    }

    #[tokio::test]
    async fn outcome_holds_the_gate_until_dismissed() {
        let fx = fixture().await;
        let raw = token(&fx.clock, "S1");

        let outcome = fx.station.scan(raw.clone(), None).await.unwrap();
        assert_eq!(fx.station.phase(), ScanPhase::Reporting(outcome));
        assert_eq!(fx.station.scan(raw.clone(), None).await, None);

        assert!(fx.station.dismiss());
        assert_eq!(fx.station.phase(), ScanPhase::Idle);
        assert!(!fx.station.dismiss());

        let again = fx.station.scan(raw, None).await.unwrap();
        assert_eq!(again.message(), "Already marked present.");
    }

    #[tokio::test]
    async fn teardown_reopens_and_discards_late_results() {
        let fx = fixture().await;
        let gate = fx.ledger.gate_writes().await;
        let raw = token(&fx.clock, "S1");

        let cycle = fx.station.begin(raw, None).unwrap();
        let inflight = tokio::spawn(cycle.run());
        while fx.ledger.record_writes() == 0 {
            tokio::task::yield_now().await;
        }

        fx.station.teardown();
        assert_eq!(fx.station.phase(), ScanPhase::Idle);

        gate.add_permits(1);
        // the write itself is not cancelled
        assert!(inflight.await.unwrap().is_success());
        assert_eq!(fx.ledger.records().await.len(), 1);
        assert_eq!(fx.station.phase(), ScanPhase::Idle);

        gate.add_permits(1);
        let next = fx.station.scan(token(&fx.clock, "S2"), None).await;
        assert!(next.unwrap().is_success());
    }

    #[tokio::test]
    async fn abandoned_cycle_reopens_the_station() {
        let fx = fixture().await;
        let raw = token(&fx.clock, "S1");

        let cycle = fx.station.begin(raw.clone(), None);
        assert!(cycle.is_some());
        drop(cycle);
        assert_eq!(fx.station.phase(), ScanPhase::Idle);

        let outcome = fx.station.scan(raw, None).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(fx.ledger.record_writes(), 1);
    }

    #[tokio::test]
    async fn cancelled_scan_reopens_the_station() {
        let fx = fixture().await;
        let gate = fx.ledger.gate_writes().await;
        let raw = token(&fx.clock, "S1");

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            fx.station.scan(raw.clone(), None),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(fx.ledger.record_writes(), 1);
        assert_eq!(fx.station.phase(), ScanPhase::Idle);

        gate.add_permits(1);
        let outcome = fx.station.scan(raw, None).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(fx.ledger.records().await.len(), 1);
    }

    #[tokio::test]
    async fn cycle_dropped_after_teardown_leaves_the_new_claim_alone() {
        let fx = fixture().await;
        let raw = token(&fx.clock, "S1");

        let stale = fx.station.begin(raw.clone(), None).unwrap();
        fx.station.teardown();
        let fresh = fx.station.begin(raw, None).unwrap();

        drop(stale);
        assert_eq!(fx.station.phase(), ScanPhase::Processing);
        assert!(fx.station.begin(token(&fx.clock, "S2"), None).is_none());

        assert!(fresh.run().await.is_success());
        assert!(matches!(fx.station.phase(), ScanPhase::Reporting(_)));
    }

    #[test]
    fn phase_serializes_with_outcome() {
        let phase = ScanPhase::Reporting(ScanOutcome::NoActiveSession);
        let value = serde_json::to_value(&phase).unwrap();
        assert_eq!(value["phase"], "reporting");
        assert_eq!(value["outcome"], "no_active_session");
    }
}
