//! Turns one scanned payload into at most one attendance record.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::credential::Credential;
use crate::ledger::{InsertOutcome, Ledger};
use crate::models::AttendanceRecord;
use crate::resolver::resolve_session;

/// Every scan ends in exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    MalformedToken { detail: String },
    Expired { display_name: String },
    NoActiveSession,
    Success { display_name: String, session_id: Uuid },
    AlreadyPresent { display_name: String, session_id: Uuid },
    WriteFailed { detail: String },
}

impl ScanOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ScanOutcome::Success { .. })
    }

    /// Who the outcome is about, as shown to the lecturer.
    pub fn label(&self) -> &str {
        match self {
            ScanOutcome::Expired { display_name }
            | ScanOutcome::Success { display_name, .. }
            | ScanOutcome::AlreadyPresent { display_name, .. } => display_name.as_str(),
            ScanOutcome::NoActiveSession => "System",
            ScanOutcome::MalformedToken { .. } | ScanOutcome::WriteFailed { .. } => "Unknown",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ScanOutcome::MalformedToken { .. } => "Invalid QR Code format",
            ScanOutcome::Expired { .. } => "QR Code Expired. Please ask student to refresh.",
            ScanOutcome::NoActiveSession => "No active session found. Create one first.",
            ScanOutcome::Success { .. } => "Attendance marked successfully.",
            ScanOutcome::AlreadyPresent { .. } => "Already marked present.",
            ScanOutcome::WriteFailed { detail } => detail.as_str(),
        }
    }
}

/// Who is scanning, and optionally which session they opened the scanner for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanContext {
    pub lecturer_id: Uuid,
    pub session_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct Verifier {
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
}

impl Verifier {
    pub fn new(ledger: Arc<dyn Ledger>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    pub async fn verify(&self, raw: &str, context: &ScanContext) -> ScanOutcome {
        let credential = match Credential::decode(raw) {
            Ok(credential) => credential,
            Err(err) => {
                log::info!("Rejected scan: {}", err);
                return ScanOutcome::MalformedToken {
                    detail: err.to_string(),
                };
            }
        };

        if !credential.is_fresh_at(self.clock.now()) {
            log::info!(
                "Rejected expired credential of student {} issued at {}",
                credential.student_id,
                credential.issued_at
            );
            return ScanOutcome::Expired {
                display_name: credential.label().to_string(),
            };
        }

        let session_id =
            match resolve_session(self.ledger.as_ref(), context.lecturer_id, context.session_id).await {
                Some(session_id) => session_id,
                None => {
                    log::info!("No active session for lecturer {}", context.lecturer_id);
                    return ScanOutcome::NoActiveSession;
                }
            };

        let record = AttendanceRecord::present(session_id, &credential.student_id, self.clock.now());
        let display_name = credential.label().to_string();
        match self.ledger.insert_record(&record).await {
            InsertOutcome::Inserted(()) => {
                log::info!("Marked student {} present in session {}", record.student_id, session_id);
                ScanOutcome::Success {
                    display_name,
                    session_id,
                }
            }
            InsertOutcome::Conflict => {
                log::info!(
                    "Student {} already present in session {}",
                    record.student_id,
                    session_id
                );
                ScanOutcome::AlreadyPresent {
                    display_name,
                    session_id,
                }
            }
            InsertOutcome::Failed(detail) => {
                log::error!("Could not record attendance in session {}: {}", session_id, detail);
                ScanOutcome::WriteFailed { detail }
            }
        }
    }
}
