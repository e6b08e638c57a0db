use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};

use crate::error::EngineResult;
use crate::roster;
use crate::session::{AttendanceRecord, AttendanceSession, SessionKind};
use crate::stats;

fn record_json(record: &AttendanceRecord) -> Value {
    json!({
        "studentId": record.student_id,
        "status": record.status.as_str(),
        "origin": record.origin.as_str(),
        "arrivalTime": record.arrival_time,
        "lateReason": record.late_reason,
        "absenceReason": record.absence_reason,
        "notes": record.notes,
        "participation": record.participation,
    })
}

/// The session shape consumers read. Kind-specific fields are always present
/// and null where they do not apply, so clients never branch on key
/// existence.
pub fn session_model(session: &AttendanceSession) -> Value {
    let statistics = stats::session_statistics(session.kind.records());
    let (venue, leave_reason, holiday_name, substitute) = match &session.kind {
        SessionKind::Normal { venue, .. } => (venue.clone(), None, None, None),
        SessionKind::TeacherLeave {
            reason,
            substitute_teacher_id,
        } => (
            None,
            Some(reason.clone()),
            None,
            substitute_teacher_id.clone(),
        ),
        SessionKind::SchoolHoliday {
            reason,
            holiday_name,
        }
        | SessionKind::InstitutionalHoliday {
            reason,
            holiday_name,
        } => (None, Some(reason.clone()), holiday_name.clone(), None),
        SessionKind::EmergencyClosure { reason } => (None, Some(reason.clone()), None, None),
    };
    json!({
        "id": session.id,
        "classId": session.class_id,
        "date": session.date_str(),
        "sessionType": session.session_type().as_str(),
        "status": session.status.as_str(),
        "conductedFlag": session.conducted(),
        "venue": venue,
        "leaveReason": leave_reason,
        "holidayName": holiday_name,
        "substituteTeacherId": substitute,
        "version": session.version,
        "finalizedAt": session.finalized_at,
        "createdBy": session.created_by,
        "updatedBy": session.updated_by,
        "createdAt": session.created_at,
        "updatedAt": session.updated_at,
        "records": session.kind.records().iter().map(record_json).collect::<Vec<_>>(),
        "statistics": statistics,
    })
}

/// Per-class attendance over a date range: the sessions themselves, the
/// conducted-day count and per-student totals. Empty ranges come back zeroed,
/// not as errors.
pub fn class_attendance_model(
    conn: &Connection,
    class_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> EngineResult<Value> {
    let class_name = roster::class_name(conn, class_id)?;
    let range = stats::class_range_stats(conn, class_id, from, to)?;
    let per_student: Vec<Value> = range
        .per_student
        .iter()
        .map(|s| {
            json!({
                "studentId": s.student.id,
                "displayName": s.student.display_name,
                "admissionNo": s.student.admission_no,
                "counts": s.counts,
                "percentage": s.percentage,
            })
        })
        .collect();
    Ok(json!({
        "class": { "id": class_id, "name": class_name },
        "from": from.format("%Y-%m-%d").to_string(),
        "to": to.format("%Y-%m-%d").to_string(),
        "conductedSessions": range.conducted_sessions,
        "sessions": range.sessions.iter().map(session_model).collect::<Vec<_>>(),
        "perStudent": per_student,
    }))
}

/// Every class's standing on one date plus the cross-class average over the
/// classes that actually met.
pub fn daily_summary_model(conn: &Connection, date: NaiveDate) -> EngineResult<Value> {
    let daily = stats::daily_stats(conn, date)?;
    let classes: Vec<Value> = daily
        .entries
        .iter()
        .map(|e| {
            let statistics = stats::session_statistics(e.session.kind.records());
            json!({
                "classId": e.session.class_id,
                "className": e.class_name,
                "sessionId": e.session.id,
                "sessionType": e.session.session_type().as_str(),
                "status": e.session.status.as_str(),
                "conductedFlag": e.session.conducted(),
                "statistics": statistics,
            })
        })
        .collect();
    Ok(json!({
        "date": date.format("%Y-%m-%d").to_string(),
        "classes": classes,
        "conductedClassCount": daily.conducted_classes,
        "averagePercentage": daily.average_percentage,
    }))
}

/// One student's record trail, oldest first, with running totals.
pub fn student_history_model(
    conn: &Connection,
    student_id: &str,
    class_id: Option<&str>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> EngineResult<Value> {
    let history = stats::student_history(conn, student_id, class_id, from, to)?;
    let sessions: Vec<Value> = history
        .entries
        .iter()
        .map(|e| {
            json!({
                "sessionId": e.session_id,
                "classId": e.class_id,
                "className": e.class_name,
                "date": e.date.format("%Y-%m-%d").to_string(),
                "sessionType": e.session_type.as_str(),
                "sessionStatus": e.session_status.as_str(),
                "status": e.record.status.as_str(),
                "origin": e.record.origin.as_str(),
                "arrivalTime": e.record.arrival_time,
                "lateReason": e.record.late_reason,
                "absenceReason": e.record.absence_reason,
                "notes": e.record.notes,
                "participation": e.record.participation,
            })
        })
        .collect();
    Ok(json!({
        "student": {
            "id": history.student.id,
            "classId": history.student.class_id,
            "displayName": history.student.display_name,
            "admissionNo": history.student.admission_no,
            "active": history.student.active,
        },
        "scopeClassId": class_id,
        "from": from.map(|d| d.format("%Y-%m-%d").to_string()),
        "to": to.map(|d| d.format("%Y-%m-%d").to_string()),
        "totals": history.totals,
        "percentage": history.percentage,
        "sessions": sessions,
    }))
}
