//! Ledger backed by the hosted Postgres database.
//!
//! Tables are owned by the backend; `migrations/` carries the shape this code
//! expects. Unique violations (SQLSTATE `23505`) surface as
//! [`InsertOutcome::Conflict`], any other failure as `Failed` with the
//! database's message.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use super::{InsertOutcome, Ledger, LedgerError};
use crate::config::Config;
use crate::models::{
    AttendanceRecord, AttendanceSession, Course, NewSession, RecordStatus, SessionStatus,
};

const UNIQUE_VIOLATION: &str = "23505";

pub struct PgLedger {
    pg: PgPool,
}

impl PgLedger {
    pub fn new(pg: PgPool) -> Self {
        Self { pg }
    }

    pub async fn connect(config: &Config, database_url: &str) -> Result<Self, LedgerError> {
        let pg = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await?;
        log::info!("Connected to PostgreSQL");

        if config.run_migrations {
            sqlx::migrate!("./migrations")
                .run(&pg)
                .await
                .map_err(|err| LedgerError::Unavailable(err.to_string()))?;
            log::info!("Database migrations applied");
        }
        Ok(Self::new(pg))
    }
}

fn classify<T>(err: sqlx::Error) -> InsertOutcome<T> {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return InsertOutcome::Conflict;
        }
    }
    log::error!("Ledger write failed: {}", err);
    InsertOutcome::Failed(err.to_string())
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    course_id: Uuid,
    lecturer_id: Uuid,
    week: i32,
    date: NaiveDate,
    time: NaiveTime,
    status: String,
    created_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_session(self) -> Result<AttendanceSession, LedgerError> {
        let status = SessionStatus::parse(&self.status).ok_or_else(|| {
            LedgerError::Corrupt(format!("session `{}` has status `{}`", self.id, self.status))
        })?;
        Ok(AttendanceSession {
            id: self.id,
            course_id: self.course_id,
            lecturer_id: self.lecturer_id,
            week: self.week,
            date: self.date,
            time: self.time,
            status,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    session_id: Uuid,
    student_id: String,
    scan_time: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: Uuid,
    lecturer_id: Uuid,
    name: String,
    code: String,
}

const SESSION_COLUMNS: &str =
    "id, course_id, lecturer_id, week, date, time, status, created_at";

#[async_trait]
impl Ledger for PgLedger {
    async fn latest_active_session(&self, lecturer_id: Uuid) -> Result<Option<Uuid>, LedgerError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM attendance_sessions \
             WHERE lecturer_id = $1 AND status = $2 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(lecturer_id)
        .bind(SessionStatus::Active.as_str())
        .fetch_optional(&self.pg)
        .await?;
        Ok(id)
    }

    async fn insert_record(&self, record: &AttendanceRecord) -> InsertOutcome {
        let res = sqlx::query(
            "INSERT INTO attendance_records (session_id, student_id, status, scan_time) \
             VALUES ($1, $2::uuid, $3, $4)",
        )
        .bind(record.session_id)
        .bind(&record.student_id)
        .bind(record.status.as_str())
        .bind(record.scan_time)
        .execute(&self.pg)
        .await;

        match res {
            Ok(done) if done.rows_affected() >= 1 => InsertOutcome::Inserted(()),
            Ok(_) => InsertOutcome::Failed("Could not save attendance record!".to_string()),
            Err(err) => classify(err),
        }
    }

    async fn insert_session(&self, new: &NewSession) -> InsertOutcome<AttendanceSession> {
        let res = sqlx::query_as::<_, SessionRow>(&format!(
            "INSERT INTO attendance_sessions (course_id, lecturer_id, week, date, time, status) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(new.course_id)
        .bind(new.lecturer_id)
        .bind(new.week)
        .bind(new.date)
        .bind(new.time)
        .bind(SessionStatus::Active.as_str())
        .fetch_one(&self.pg)
        .await;

        match res.map(SessionRow::into_session) {
            Ok(Ok(session)) => InsertOutcome::Inserted(session),
            Ok(Err(corrupt)) => InsertOutcome::Failed(corrupt.to_string()),
            Err(err) => classify(err),
        }
    }

    async fn find_session(
        &self,
        course_id: Uuid,
        week: i32,
        date: NaiveDate,
    ) -> Result<Option<AttendanceSession>, LedgerError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM attendance_sessions \
             WHERE course_id = $1 AND week = $2 AND date = $3 LIMIT 1",
            SESSION_COLUMNS
        ))
        .bind(course_id)
        .bind(week)
        .bind(date)
        .fetch_optional(&self.pg)
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn courses_for(&self, lecturer_id: Uuid) -> Result<Vec<Course>, LedgerError> {
        let rows = sqlx::query_as::<_, CourseRow>(
            "SELECT id, lecturer_id, name, code FROM courses \
             WHERE lecturer_id = $1 ORDER BY name",
        )
        .bind(lecturer_id)
        .fetch_all(&self.pg)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Course {
                id: row.id,
                lecturer_id: row.lecturer_id,
                name: row.name,
                code: row.code,
            })
            .collect())
    }

    async fn records_for(&self, session_id: Uuid) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT session_id, student_id::text AS student_id, scan_time \
             FROM attendance_records WHERE session_id = $1 ORDER BY scan_time",
        )
        .bind(session_id)
        .fetch_all(&self.pg)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AttendanceRecord {
                session_id: row.session_id,
                student_id: row.student_id,
                status: RecordStatus::Present,
                scan_time: row.scan_time,
            })
            .collect())
    }
}
