//! The attendance ledger: the hosted store that owns courses, sessions and
//! attendance records.
//!
//! Callers never hold a lock on the ledger across a scan. The uniqueness
//! constraints it enforces, one session per (course, week, date) and one
//! record per (session, student), are what keep concurrent lecturers and
//! rapid re-scans from double counting. Writes report a violated constraint
//! as [`InsertOutcome::Conflict`] so callers can branch on it without knowing
//! the backend's error codes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AttendanceRecord, AttendanceSession, Course, NewSession};

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Result of a write against a uniqueness-constrained table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome<T = ()> {
    Inserted(T),
    Conflict,
    Failed(String),
}

impl<T> InsertOutcome<T> {
    pub fn is_conflict(&self) -> bool {
        matches!(self, InsertOutcome::Conflict)
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Most recently created `active` session owned by the lecturer.
    async fn latest_active_session(&self, lecturer_id: Uuid) -> Result<Option<Uuid>, LedgerError>;

    async fn insert_record(&self, record: &AttendanceRecord) -> InsertOutcome;

    async fn insert_session(&self, session: &NewSession) -> InsertOutcome<AttendanceSession>;

    async fn find_session(
        &self,
        course_id: Uuid,
        week: i32,
        date: NaiveDate,
    ) -> Result<Option<AttendanceSession>, LedgerError>;

    /// The lecturer's courses ordered by name.
    async fn courses_for(&self, lecturer_id: Uuid) -> Result<Vec<Course>, LedgerError>;

    /// Records of one session ordered by scan time.
    async fn records_for(&self, session_id: Uuid) -> Result<Vec<AttendanceRecord>, LedgerError>;
}
