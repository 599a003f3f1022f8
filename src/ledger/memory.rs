//! In-process ledger with the same uniqueness rules as the hosted one.
//!
//! Used when no `DATABASE_URL` is configured and throughout the tests. Reads
//! and writes can be made to fail, and writes can be held at a gate, so every
//! scan outcome and interleaving can be reproduced without a database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use super::{InsertOutcome, Ledger, LedgerError};
use crate::clock::{Clock, SystemClock};
use crate::models::{AttendanceRecord, AttendanceSession, Course, NewSession, SessionStatus};

#[derive(Default)]
struct Tables {
    courses: Vec<Course>,
    // insertion order breaks created_at ties
    sessions: Vec<(u64, AttendanceSession)>,
    records: Vec<AttendanceRecord>,
    next_seq: u64,
    failing_reads: Option<String>,
    failing_writes: Option<String>,
    write_gate: Option<Arc<Semaphore>>,
}

pub struct MemoryLedger {
    tables: Mutex<Tables>,
    clock: Arc<dyn Clock>,
    record_writes: AtomicUsize,
    session_reads: AtomicUsize,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// `created_at` of new sessions comes from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            clock,
            record_writes: AtomicUsize::new(0),
            session_reads: AtomicUsize::new(0),
        }
    }

    pub async fn add_course(&self, lecturer_id: Uuid, name: &str, code: &str) -> Course {
        let course = Course {
            id: Uuid::new_v4(),
            lecturer_id,
            name: name.to_string(),
            code: code.to_string(),
        };
        self.tables.lock().await.courses.push(course.clone());
        course
    }

    /// Seeds a session directly, bypassing the uniqueness check.
    pub async fn add_session(&self, new: NewSession, status: SessionStatus) -> AttendanceSession {
        let mut tables = self.tables.lock().await;
        self.push_session(&mut tables, new, status)
    }

    fn push_session(&self, tables: &mut Tables, new: NewSession, status: SessionStatus) -> AttendanceSession {
        let session = AttendanceSession {
            id: Uuid::new_v4(),
            course_id: new.course_id,
            lecturer_id: new.lecturer_id,
            week: new.week,
            date: new.date,
            time: new.time,
            status,
            created_at: self.clock.now(),
        };
        let seq = tables.next_seq;
        tables.next_seq += 1;
        tables.sessions.push((seq, session.clone()));
        session
    }

    pub async fn records(&self) -> Vec<AttendanceRecord> {
        self.tables.lock().await.records.clone()
    }

    pub async fn fail_reads(&self, detail: Option<&str>) {
        self.tables.lock().await.failing_reads = detail.map(str::to_string);
    }

    pub async fn fail_writes(&self, detail: Option<&str>) {
        self.tables.lock().await.failing_writes = detail.map(str::to_string);
    }

    /// Holds every following record write until a permit is added to the
    /// returned semaphore.
    pub async fn gate_writes(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.tables.lock().await.write_gate = Some(gate.clone());
        gate
    }

    /// Number of record inserts attempted, successful or not.
    pub fn record_writes(&self) -> usize {
        self.record_writes.load(Ordering::SeqCst)
    }

    /// Number of active-session lookups performed.
    pub fn session_reads(&self) -> usize {
        self.session_reads.load(Ordering::SeqCst)
    }

    async fn check_reads(&self) -> Result<(), LedgerError> {
        match &self.tables.lock().await.failing_reads {
            Some(detail) => Err(LedgerError::Unavailable(detail.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn latest_active_session(&self, lecturer_id: Uuid) -> Result<Option<Uuid>, LedgerError> {
        self.session_reads.fetch_add(1, Ordering::SeqCst);
        self.check_reads().await?;
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .iter()
            .filter(|(_, s)| s.lecturer_id == lecturer_id && s.is_active())
            .max_by_key(|(seq, s)| (s.created_at, *seq))
            .map(|(_, s)| s.id))
    }

    async fn insert_record(&self, record: &AttendanceRecord) -> InsertOutcome {
        self.record_writes.fetch_add(1, Ordering::SeqCst);
        let gate = self.tables.lock().await.write_gate.clone();
        if let Some(gate) = gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return InsertOutcome::Failed("write gate closed".to_string()),
            }
        }

        let mut tables = self.tables.lock().await;
        if let Some(detail) = &tables.failing_writes {
            return InsertOutcome::Failed(detail.clone());
        }
        if !tables.sessions.iter().any(|(_, s)| s.id == record.session_id) {
            return InsertOutcome::Failed(format!(
                "session `{}` does not exist",
                record.session_id
            ));
        }
        let duplicate = tables
            .records
            .iter()
            .any(|r| r.session_id == record.session_id && r.student_id == record.student_id);
        if duplicate {
            return InsertOutcome::Conflict;
        }
        tables.records.push(record.clone());
        InsertOutcome::Inserted(())
    }

    async fn insert_session(&self, new: &NewSession) -> InsertOutcome<AttendanceSession> {
        let mut tables = self.tables.lock().await;
        if let Some(detail) = &tables.failing_writes {
            return InsertOutcome::Failed(detail.clone());
        }
        let duplicate = tables
            .sessions
            .iter()
            .any(|(_, s)| s.course_id == new.course_id && s.week == new.week && s.date == new.date);
        if duplicate {
            return InsertOutcome::Conflict;
        }
        InsertOutcome::Inserted(self.push_session(&mut tables, new.clone(), SessionStatus::Active))
    }

    async fn find_session(
        &self,
        course_id: Uuid,
        week: i32,
        date: NaiveDate,
    ) -> Result<Option<AttendanceSession>, LedgerError> {
        self.check_reads().await?;
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .iter()
            .map(|(_, s)| s)
            .find(|s| s.course_id == course_id && s.week == week && s.date == date)
            .cloned())
    }

    async fn courses_for(&self, lecturer_id: Uuid) -> Result<Vec<Course>, LedgerError> {
        self.check_reads().await?;
        let tables = self.tables.lock().await;
        let mut courses: Vec<Course> = tables
            .courses
            .iter()
            .filter(|c| c.lecturer_id == lecturer_id)
            .cloned()
            .collect();
        courses.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(courses)
    }

    async fn records_for(&self, session_id: Uuid) -> Result<Vec<AttendanceRecord>, LedgerError> {
        self.check_reads().await?;
        let tables = self.tables.lock().await;
        let mut records: Vec<AttendanceRecord> = tables
            .records
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.scan_time);
        Ok(records)
    }
}
