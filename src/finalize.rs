use chrono::{NaiveDate, Utc};
use rusqlite::Connection;

use crate::error::{EngineError, EngineResult};
use crate::roster;
use crate::session::{AttendanceSession, SessionStatus};
use crate::store;

/// Lock the (class, date) session once every active roster student has a
/// record. Only active normal sessions qualify; leave days have nothing to
/// finalize and completed sessions stay locked.
pub fn finalize(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
    finalized_by: Option<&str>,
) -> EngineResult<AttendanceSession> {
    if !roster::class_exists(conn, class_id)? {
        return Err(EngineError::not_found("class", class_id));
    }
    let Some(mut session) = store::get_session(conn, class_id, date)? else {
        return Err(EngineError::not_found(
            "session",
            format!("{}@{}", class_id, date.format("%Y-%m-%d")),
        ));
    };

    if session.is_finalized() {
        return Err(EngineError::SessionLocked {
            class_id: session.class_id.clone(),
            date: session.date_str(),
        });
    }
    if !session.conducted() || session.status != SessionStatus::Active {
        return Err(EngineError::invalid(format!(
            "only active normal sessions can be finalized, this one is {} ({})",
            session.status.as_str(),
            session.session_type().as_str()
        )));
    }

    let roster = roster::active_students(conn, class_id)?;
    let recorded: std::collections::HashSet<&str> = session
        .kind
        .records()
        .iter()
        .map(|r| r.student_id.as_str())
        .collect();
    let missing: Vec<String> = roster
        .iter()
        .filter(|s| !recorded.contains(s.id.as_str()))
        .map(|s| s.id.clone())
        .collect();
    if !missing.is_empty() {
        tracing::warn!(
            class_id = %session.class_id,
            date = %session.date,
            missing = missing.len(),
            "finalize rejected, roster not fully covered"
        );
        return Err(EngineError::IncompleteRoster { missing });
    }

    let now = Utc::now().to_rfc3339();
    session.status = SessionStatus::Completed;
    session.finalized_at = Some(now.clone());
    session.version += 1;
    session.updated_by = finalized_by.map(|s| s.to_string());
    session.updated_at = now;
    store::upsert_session(conn, &session)?;
    tracing::info!(
        class_id = %session.class_id,
        date = %session.date,
        version = session.version,
        "finalized attendance session"
    );
    Ok(session)
}
