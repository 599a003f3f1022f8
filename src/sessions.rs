//! Lecturer-side session management: opening a session for a class, listing
//! the lecturer's courses and reading back who attended.

use thiserror::Error;
use uuid::Uuid;

use crate::ledger::{InsertOutcome, Ledger, LedgerError};
use crate::models::{AttendanceRecord, AttendanceSession, Course, NewSession, TEACHING_WEEKS};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("week {0} is outside of the teaching weeks 1-14")]
    InvalidWeek(i32),
    #[error("session write failed: {0}")]
    WriteFailed(String),
    #[error("session for course `{course_id}` week {week} conflicted but could not be found")]
    Vanished { course_id: Uuid, week: i32 },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Opens an `active` session, or returns the one that already exists for the
/// same course, week and date.
pub async fn open_session(ledger: &dyn Ledger, new: NewSession) -> Result<AttendanceSession, SessionError> {
    if !TEACHING_WEEKS.contains(&new.week) {
        return Err(SessionError::InvalidWeek(new.week));
    }

    match ledger.insert_session(&new).await {
        InsertOutcome::Inserted(session) => {
            log::info!(
                "Opened session {} for course {} week {}",
                session.id,
                session.course_id,
                session.week
            );
            Ok(session)
        }
        InsertOutcome::Conflict => {
            log::info!(
                "Session for course {} week {} on {} already exists, reusing it",
                new.course_id,
                new.week,
                new.date
            );
            ledger
                .find_session(new.course_id, new.week, new.date)
                .await?
                .ok_or(SessionError::Vanished {
                    course_id: new.course_id,
                    week: new.week,
                })
        }
        InsertOutcome::Failed(detail) => Err(SessionError::WriteFailed(detail)),
    }
}

pub async fn list_courses(ledger: &dyn Ledger, lecturer_id: Uuid) -> Result<Vec<Course>, SessionError> {
    Ok(ledger.courses_for(lecturer_id).await?)
}

pub async fn session_roster(
    ledger: &dyn Ledger,
    session_id: Uuid,
) -> Result<Vec<AttendanceRecord>, SessionError> {
    Ok(ledger.records_for(session_id).await?)
}
