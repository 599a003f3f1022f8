use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::Path;
use axum::handler::Handler;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use uuid::Uuid;

use crate::clock::Clock;
use crate::err::{self, Error};
use crate::ledger::Ledger;
use crate::models::{AttendanceRecord, AttendanceSession, Course, NewSession};
use crate::sessions::{self, SessionError};
use crate::station::{ScanPhase, ScanStation};
use crate::verifier::Verifier;
use crate::{breaks, proceeds, Payload};

pub struct AppState {
    ledger: Arc<dyn Ledger>,
    verifier: Verifier,
    stations: Mutex<HashMap<Uuid, Arc<ScanStation>>>,
}

impl AppState {
    pub fn new(ledger: Arc<dyn Ledger>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            verifier: Verifier::new(ledger.clone(), clock),
            ledger,
            stations: Mutex::new(HashMap::new()),
        })
    }

    /// The lecturer's station, mounting a fresh one if there is none.
    pub fn station(&self, lecturer_id: Uuid) -> Arc<ScanStation> {
        self.stations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(lecturer_id)
            .or_insert_with(|| ScanStation::new(self.verifier.clone(), lecturer_id))
            .clone()
    }

    /// The lecturer's station if one is mounted.
    pub fn existing_station(&self, lecturer_id: Uuid) -> Option<Arc<ScanStation>> {
        self.stations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&lecturer_id)
            .cloned()
    }

    pub fn unmount(&self, lecturer_id: Uuid) -> bool {
        let removed = self
            .stations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&lecturer_id);
        match removed {
            Some(station) => {
                station.teardown();
                true
            }
            None => false,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/lecturers/:lecturer/scan",
            get(scan_status).post(submit_scan).delete(unmount_station),
        )
        .route("/lecturers/:lecturer/scan/next", post(scan_next))
        .route("/lecturers/:lecturer/sessions", post(open_session))
        .route("/lecturers/:lecturer/courses", get(list_courses))
        .route("/sessions/:session/records", get(session_records))
        .fallback(err::handler404.into_service())
        .layer(ServiceBuilder::new().layer(Extension(state)))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitScan {
    pub payload: String,
    pub session_id: Option<Uuid>,
}

/// What the lecturer's screen shows for an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanDisplay {
    pub success: bool,
    pub label: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StationState {
    pub accepted: bool,
    pub station: ScanPhase,
    pub display: Option<ScanDisplay>,
}

impl StationState {
    fn of(accepted: bool, station: ScanPhase) -> Self {
        let display = match &station {
            ScanPhase::Reporting(outcome) => Some(ScanDisplay {
                success: outcome.is_success(),
                label: outcome.label().to_string(),
                message: outcome.message().to_string(),
            }),
            _ => None,
        };
        Self {
            accepted,
            station,
            display,
        }
    }
}

pub async fn submit_scan(
    Path(lecturer): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<SubmitScan>,
) -> Payload<StationState> {
    let station = state.station(lecturer);
    let cycle = match station.begin(body.payload, body.session_id) {
        Some(cycle) => cycle,
        None => return proceeds(StationState::of(false, station.phase())),
    };

    // a dropped request must not abandon a write that already started
    let outcome = tokio::spawn(cycle.run())
        .await
        .map_err(|err| Error::unknown(format!("Scan task failed: {}", err)))?;
    log::info!("Scan for lecturer {} finished: {}", lecturer, outcome.message());
    proceeds(StationState::of(true, station.phase()))
}

pub async fn scan_status(
    Path(lecturer): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> Payload<StationState> {
    let phase = state
        .existing_station(lecturer)
        .map_or(ScanPhase::Idle, |station| station.phase());
    proceeds(StationState::of(false, phase))
}

#[derive(Debug, Clone, Serialize)]
pub struct Dismissed {
    pub dismissed: bool,
    pub station: ScanPhase,
}

pub async fn scan_next(
    Path(lecturer): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> Payload<Dismissed> {
    let dismissed = match state.existing_station(lecturer) {
        Some(station) => Dismissed {
            dismissed: station.dismiss(),
            station: station.phase(),
        },
        None => Dismissed {
            dismissed: false,
            station: ScanPhase::Idle,
        },
    };
    proceeds(dismissed)
}

#[derive(Debug, Clone, Serialize)]
pub struct Unmounted {
    pub lecturer_id: Uuid,
    pub unmounted: bool,
}

pub async fn unmount_station(
    Path(lecturer): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> Payload<Unmounted> {
    proceeds(Unmounted {
        lecturer_id: lecturer,
        unmounted: state.unmount(lecturer),
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenSession {
    pub course_id: Uuid,
    pub week: i32,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

pub async fn open_session(
    Path(lecturer): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<OpenSession>,
) -> Payload<AttendanceSession> {
    let new = NewSession {
        course_id: body.course_id,
        lecturer_id: lecturer,
        week: body.week,
        date: body.date,
        time: body.time,
    };
    match sessions::open_session(state.ledger.as_ref(), new).await {
        Ok(session) => proceeds(session),
        Err(err @ SessionError::InvalidWeek(_)) => breaks(Error::InvalidPayload {
            message: err.to_string(),
        }),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseList {
    pub courses: Vec<Course>,
}

pub async fn list_courses(
    Path(lecturer): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> Payload<CourseList> {
    let courses = sessions::list_courses(state.ledger.as_ref(), lecturer).await?;
    proceeds(CourseList { courses })
}

#[derive(Debug, Clone, Serialize)]
pub struct Roster {
    pub session_id: Uuid,
    pub records: Vec<AttendanceRecord>,
}

pub async fn session_records(
    Path(session): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> Payload<Roster> {
    let records = sessions::session_roster(state.ledger.as_ref(), session).await?;
    proceeds(Roster {
        session_id: session,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::credential::{CredentialGenerator, StudentIdentity};
    use crate::err::Maybe;
    use crate::ledger::MemoryLedger;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        clock: Arc<ManualClock>,
        state: Arc<AppState>,
        lecturer: Uuid,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()));
        let ledger = Arc::new(MemoryLedger::with_clock(clock.clone()));
        Fixture {
            state: AppState::new(ledger.clone(), clock.clone()),
            ledger,
            clock,
            lecturer: Uuid::new_v4(),
        }
    }

    fn fine<T>(payload: Payload<T>) -> T {
        match payload {
            Ok(Json(Maybe::Fine(success))) => success.into_value(),
            Ok(Json(Maybe::Nothing(err))) => panic!("handler refused: {:?}", err),
            Err(err) => panic!("handler failed: {:?}", err),
        }
    }

    fn token(fx: &Fixture) -> String {
        let clock: Arc<dyn Clock> = fx.clock.clone();
        CredentialGenerator::new(
            StudentIdentity {
                student_id: "S1".to_string(),
                name: Some("Ann".to_string()),
                email: None,
            },
            clock,
        )
        .issue()
        .unwrap()
    }

    async fn open(fx: &Fixture) -> AttendanceSession {
        let course = fx.ledger.add_course(fx.lecturer, "Security", "CS458").await;
        fine(
            open_session(
                Path(fx.lecturer),
                Extension(fx.state.clone()),
                Json(OpenSession {
                    course_id: course.id,
                    week: 4,
                    date: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
                    time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                }),
            )
            .await,
        )
    }

    async fn scan(fx: &Fixture, payload: String, session_id: Option<Uuid>) -> StationState {
        fine(
            submit_scan(
                Path(fx.lecturer),
                Extension(fx.state.clone()),
                Json(SubmitScan { payload, session_id }),
            )
            .await,
        )
    }

    #[tokio::test]
    async fn scan_then_next_then_duplicate() {
        let fx = fixture();
        let session = open(&fx).await;

        let first = scan(&fx, token(&fx), None).await;
        assert!(first.accepted);
        let display = first.display.unwrap();
        assert!(display.success);
        assert_eq!(display.label, "Ann");

        let blocked = scan(&fx, token(&fx), None).await;
        assert!(!blocked.accepted);

        let next = fine(scan_next(Path(fx.lecturer), Extension(fx.state.clone())).await);
        assert!(next.dismissed);
        assert_eq!(next.station, ScanPhase::Idle);

        let again = scan(&fx, token(&fx), Some(session.id)).await;
        assert_eq!(again.display.unwrap().message, "Already marked present.");

        let roster = fine(session_records(Path(session.id), Extension(fx.state.clone())).await);
        assert_eq!(roster.records.len(), 1);
    }

    #[tokio::test]
    async fn scan_without_session_reports_it() {
        let fx = fixture();
        let state = scan(&fx, token(&fx), None).await;
        let display = state.display.unwrap();
        assert_eq!(display.label, "System");
        assert_eq!(display.message, "No active session found. Create one first.");
    }

    #[tokio::test]
    async fn unmount_gives_a_clean_station() {
        let fx = fixture();
        open(&fx).await;
        scan(&fx, "garbage".to_string(), None).await;
        assert!(matches!(fx.state.station(fx.lecturer).phase(), ScanPhase::Reporting(_)));

        let unmounted = fine(unmount_station(Path(fx.lecturer), Extension(fx.state.clone())).await);
        assert!(unmounted.unmounted);
        assert_eq!(fx.state.station(fx.lecturer).phase(), ScanPhase::Idle);
        assert!(scan(&fx, token(&fx), None).await.accepted);
    }

    #[tokio::test]
    async fn reads_do_not_mount_stations() {
        let fx = fixture();
        let stranger = Uuid::new_v4();

        let status = fine(scan_status(Path(stranger), Extension(fx.state.clone())).await);
        assert!(!status.accepted);
        assert_eq!(status.station, ScanPhase::Idle);

        let next = fine(scan_next(Path(stranger), Extension(fx.state.clone())).await);
        assert!(!next.dismissed);
        assert_eq!(next.station, ScanPhase::Idle);

        assert!(fx.state.existing_station(stranger).is_none());
        assert!(fx.state.stations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_week_is_refused() {
        let fx = fixture();
        let course = fx.ledger.add_course(fx.lecturer, "Security", "CS458").await;
        let res = open_session(
            Path(fx.lecturer),
            Extension(fx.state.clone()),
            Json(OpenSession {
                course_id: course.id,
                week: 20,
                date: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
                time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            }),
        )
        .await;
        assert!(matches!(res, Ok(Json(Maybe::Nothing(Error::InvalidPayload { .. })))));
    }

    #[tokio::test]
    async fn ledger_outage_is_an_internal_error() {
        let fx = fixture();
        fx.ledger.fail_reads(Some("timeout")).await;
        let res = list_courses(Path(fx.lecturer), Extension(fx.state.clone())).await;
        match res {
            Err(err) => assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn router_serves_known_paths_and_404s_the_rest() {
        let fx = fixture();
        let app = router(fx.state.clone());

        let status = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/lecturers/{}/scan", fx.lecturer))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status();
        assert_eq!(status, StatusCode::OK);

        let status = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/nowhere")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
