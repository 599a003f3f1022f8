use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Weeks a session can be opened for, as offered by the lecturer's week picker.
pub const TEACHING_WEEKS: std::ops::RangeInclusive<i32> = 1..=14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(SessionStatus::Active),
            "closed" => Some(SessionStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Present,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Present => "present",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub lecturer_id: Uuid,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceSession {
    pub id: Uuid,
    pub course_id: Uuid,
    pub lecturer_id: Uuid,
    pub week: i32,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl AttendanceSession {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// A session the lecturer asked to open; the ledger assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub course_id: Uuid,
    pub lecturer_id: Uuid,
    pub week: i32,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// One student marked present in one session. Identity is (session_id, student_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub session_id: Uuid,
    pub student_id: String,
    pub status: RecordStatus,
    pub scan_time: DateTime<Utc>,
}

impl AttendanceRecord {
    pub fn present(session_id: Uuid, student_id: impl Into<String>, scan_time: DateTime<Utc>) -> Self {
        Self {
            session_id,
            student_id: student_id.into(),
            status: RecordStatus::Present,
            scan_time,
        }
    }
}
