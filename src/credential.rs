//! Student credential tokens.
//!
//! A token is a small JSON object (`studentId`, `name`, `timestamp`) that the
//! student's device renders as a QR code. Nothing about it is persisted: the
//! device re-issues one every [`ROTATION_INTERVAL`] and the lecturer's device
//! accepts it for [`FRESHNESS_WINDOW_SECS`] after the embedded timestamp.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::Clock;

pub const FRESHNESS_WINDOW_SECS: i64 = 30;
pub const ROTATION_INTERVAL: Duration = Duration::from_secs(5);

const FALLBACK_NAME: &str = "Student";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid QR Code format: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid QR Code format: `studentId` is blank")]
    BlankStudent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "studentId")]
    pub student_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "timestamp", serialize_with = "iso_millis")]
    pub issued_at: DateTime<Utc>,
}

fn iso_millis<S>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl Credential {
    pub fn encode(&self) -> Result<String, TokenError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a scanned payload. Extra keys are ignored, missing ones are not.
    pub fn decode(raw: &str) -> Result<Self, TokenError> {
        let credential: Credential = serde_json::from_str(raw.trim())?;
        if credential.student_id.trim().is_empty() {
            return Err(TokenError::BlankStudent);
        }
        Ok(credential)
    }

    /// Name to show the lecturer. Never used for identity.
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            FALLBACK_NAME
        } else {
            &self.display_name
        }
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.issued_at) <= chrono::Duration::seconds(FRESHNESS_WINDOW_SECS)
    }
}

/// The signed-in student, as handed over by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentIdentity {
    pub student_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl StudentIdentity {
    pub fn display_name(&self) -> String {
        [self.name.as_deref(), self.email.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or(FALLBACK_NAME)
            .to_string()
    }
}

#[derive(Clone)]
pub struct CredentialGenerator {
    identity: StudentIdentity,
    clock: Arc<dyn Clock>,
}

impl CredentialGenerator {
    pub fn new(identity: StudentIdentity, clock: Arc<dyn Clock>) -> Self {
        Self { identity, clock }
    }

    pub fn generate(&self) -> Credential {
        Credential {
            student_id: self.identity.student_id.clone(),
            display_name: self.identity.display_name(),
            // the wire format carries milliseconds, keep the in-memory value identical
            issued_at: self.clock.now().trunc_subsecs(3),
        }
    }

    pub fn issue(&self) -> Result<String, TokenError> {
        self.generate().encode()
    }

    /// Starts re-issuing the token every [`ROTATION_INTERVAL`]. The first token is
    /// available immediately; the timer stops when the returned handle is dropped.
    pub fn rotate(self) -> Result<CredentialRotation, TokenError> {
        let first = self.issue()?;
        let (tx, rx) = watch::channel(first);
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(ROTATION_INTERVAL);
            // interval yields immediately once; the first token is already out
            ticks.tick().await;
            loop {
                ticks.tick().await;
                match self.issue() {
                    Ok(token) => {
                        log::debug!("Rotated credential for student {}", self.identity.student_id);
                        if tx.send(token).is_err() {
                            break;
                        }
                    }
                    Err(err) => log::error!("Could not encode credential: {}", err),
                }
            }
        });
        Ok(CredentialRotation { current: rx, task })
    }
}

/// Handle to a running token rotation, tied to the lifetime of the QR screen.
pub struct CredentialRotation {
    current: watch::Receiver<String>,
    task: JoinHandle<()>,
}

impl CredentialRotation {
    pub fn current(&self) -> String {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.current.clone()
    }
}

impl Drop for CredentialRotation {
    fn drop(&mut self) {
        self.task.abort();
    }
}
