use uuid::Uuid;

use crate::ledger::Ledger;

/// Picks the session a scan is recorded against.
///
/// An explicit session wins. Otherwise the lecturer's newest `active` session
/// is used, even when several courses have one open at the same time.
/// `None` means the lecturer has to open a session first; a failed lookup is
/// logged and treated the same way.
pub async fn resolve_session(
    ledger: &dyn Ledger,
    lecturer_id: Uuid,
    explicit: Option<Uuid>,
) -> Option<Uuid> {
    if let Some(session_id) = explicit {
        return Some(session_id);
    }
    match ledger.latest_active_session(lecturer_id).await {
        Ok(found) => found,
        Err(err) => {
            log::error!("Active session lookup for lecturer {} failed: {}", lecturer_id, err);
            None
        }
    }
}
