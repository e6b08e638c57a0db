use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::session::{
    AttendanceRecord, AttendanceSession, AttendanceStatus, RecordOrigin, SessionKind,
    SessionStatus,
};

const SESSION_COLS: &str = "id, class_id, date, session_type, status, venue, leave_reason, \
     holiday_name, substitute_teacher_id, version, finalized_at, created_by, updated_by, \
     created_at, updated_at";

struct SessionRow {
    id: String,
    class_id: String,
    date: String,
    session_type: String,
    status: String,
    venue: Option<String>,
    leave_reason: Option<String>,
    holiday_name: Option<String>,
    substitute_teacher_id: Option<String>,
    version: i64,
    finalized_at: Option<String>,
    created_by: Option<String>,
    updated_by: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

fn session_row(row: &Row) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        class_id: row.get(1)?,
        date: row.get(2)?,
        session_type: row.get(3)?,
        status: row.get(4)?,
        venue: row.get(5)?,
        leave_reason: row.get(6)?,
        holiday_name: row.get(7)?,
        substitute_teacher_id: row.get(8)?,
        version: row.get(9)?,
        finalized_at: row.get(10)?,
        created_by: row.get(11)?,
        updated_by: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

struct RecordRow {
    student_id: String,
    status: String,
    origin: String,
    arrival_time: Option<String>,
    late_reason: Option<String>,
    absence_reason: Option<String>,
    notes: Option<String>,
    participation: Option<i64>,
}

fn load_records(conn: &Connection, session_id: &str) -> EngineResult<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, status, origin, arrival_time, late_reason, absence_reason,
                notes, participation
         FROM attendance_records WHERE session_id = ? ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([session_id], |row| {
            Ok(RecordRow {
                student_id: row.get(0)?,
                status: row.get(1)?,
                origin: row.get(2)?,
                arrival_time: row.get(3)?,
                late_reason: row.get(4)?,
                absence_reason: row.get(5)?,
                notes: row.get(6)?,
                participation: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|r| {
            let status = AttendanceStatus::parse(&r.status).ok_or_else(|| {
                EngineError::invalid(format!(
                    "stored record for student {} has unknown status '{}'",
                    r.student_id, r.status
                ))
            })?;
            let origin = RecordOrigin::parse(&r.origin).ok_or_else(|| {
                EngineError::invalid(format!(
                    "stored record for student {} has unknown origin '{}'",
                    r.student_id, r.origin
                ))
            })?;
            Ok(AttendanceRecord {
                student_id: r.student_id,
                status,
                origin,
                arrival_time: r.arrival_time,
                late_reason: r.late_reason,
                absence_reason: r.absence_reason,
                notes: r.notes,
                participation: r.participation,
            })
        })
        .collect()
}

fn assemble(conn: &Connection, raw: SessionRow) -> EngineResult<AttendanceSession> {
    let date = NaiveDate::parse_from_str(&raw.date, "%Y-%m-%d").map_err(|_| {
        EngineError::invalid(format!("stored session {} has bad date '{}'", raw.id, raw.date))
    })?;
    let status = SessionStatus::parse(&raw.status).ok_or_else(|| {
        EngineError::invalid(format!(
            "stored session {} has unknown status '{}'",
            raw.id, raw.status
        ))
    })?;
    let kind = match raw.session_type.as_str() {
        "normal" => SessionKind::Normal {
            records: load_records(conn, &raw.id)?,
            venue: raw.venue,
        },
        "teacher-leave" => SessionKind::TeacherLeave {
            reason: raw.leave_reason.unwrap_or_default(),
            substitute_teacher_id: raw.substitute_teacher_id,
        },
        "school-holiday" => SessionKind::SchoolHoliday {
            reason: raw.leave_reason.unwrap_or_default(),
            holiday_name: raw.holiday_name,
        },
        "institutional-holiday" => SessionKind::InstitutionalHoliday {
            reason: raw.leave_reason.unwrap_or_default(),
            holiday_name: raw.holiday_name,
        },
        "emergency-closure" => SessionKind::EmergencyClosure {
            reason: raw.leave_reason.unwrap_or_default(),
        },
        other => {
            return Err(EngineError::invalid(format!(
                "stored session {} has unknown type '{}'",
                raw.id, other
            )))
        }
    };
    Ok(AttendanceSession {
        id: raw.id,
        class_id: raw.class_id,
        date,
        kind,
        status,
        version: raw.version,
        finalized_at: raw.finalized_at,
        created_by: raw.created_by,
        updated_by: raw.updated_by,
        created_at: raw.created_at.unwrap_or_default(),
        updated_at: raw.updated_at.unwrap_or_default(),
    })
}

/// Load the one session for (class, date), records included.
pub fn get_session(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
) -> EngineResult<Option<AttendanceSession>> {
    let sql = format!(
        "SELECT {SESSION_COLS} FROM attendance_sessions WHERE class_id = ? AND date = ?"
    );
    let raw = conn
        .query_row(
            &sql,
            (class_id, date.format("%Y-%m-%d").to_string()),
            session_row,
        )
        .optional()?;
    match raw {
        Some(r) => Ok(Some(assemble(conn, r)?)),
        None => Ok(None),
    }
}

/// Write a session and its records in one transaction. The row for
/// (class, date) is inserted or fully replaced; records are rewritten so the
/// stored set always mirrors the session exactly. `created_*` columns stick
/// on conflict.
pub fn upsert_session(conn: &Connection, session: &AttendanceSession) -> EngineResult<()> {
    let (venue, leave_reason, holiday_name, substitute) = match &session.kind {
        SessionKind::Normal { venue, .. } => (venue.as_deref(), None, None, None),
        SessionKind::TeacherLeave {
            reason,
            substitute_teacher_id,
        } => (
            None,
            Some(reason.as_str()),
            None,
            substitute_teacher_id.as_deref(),
        ),
        SessionKind::SchoolHoliday {
            reason,
            holiday_name,
        }
        | SessionKind::InstitutionalHoliday {
            reason,
            holiday_name,
        } => (None, Some(reason.as_str()), holiday_name.as_deref(), None),
        SessionKind::EmergencyClosure { reason } => (None, Some(reason.as_str()), None, None),
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO attendance_sessions(
            id, class_id, date, session_type, status, conducted, venue,
            leave_reason, holiday_name, substitute_teacher_id, version,
            finalized_at, created_by, updated_by, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT(class_id, date) DO UPDATE SET
            session_type = excluded.session_type,
            status = excluded.status,
            conducted = excluded.conducted,
            venue = excluded.venue,
            leave_reason = excluded.leave_reason,
            holiday_name = excluded.holiday_name,
            substitute_teacher_id = excluded.substitute_teacher_id,
            version = excluded.version,
            finalized_at = excluded.finalized_at,
            updated_by = excluded.updated_by,
            updated_at = excluded.updated_at",
        params![
            session.id,
            session.class_id,
            session.date_str(),
            session.session_type().as_str(),
            session.status.as_str(),
            session.conducted() as i64,
            venue,
            leave_reason,
            holiday_name,
            substitute,
            session.version,
            session.finalized_at,
            session.created_by,
            session.updated_by,
            session.created_at,
            session.updated_at,
        ],
    )?;
    tx.execute(
        "DELETE FROM attendance_records WHERE session_id = ?",
        [&session.id],
    )?;
    for (i, rec) in session.kind.records().iter().enumerate() {
        tx.execute(
            "INSERT INTO attendance_records(
                id, session_id, student_id, status, origin, arrival_time,
                late_reason, absence_reason, notes, participation, sort_order)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                Uuid::new_v4().to_string(),
                session.id,
                rec.student_id,
                rec.status.as_str(),
                rec.origin.as_str(),
                rec.arrival_time,
                rec.late_reason,
                rec.absence_reason,
                rec.notes,
                rec.participation,
                i as i64,
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Sessions of one class within an inclusive date range, oldest first.
pub fn list_for_class(
    conn: &Connection,
    class_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> EngineResult<Vec<AttendanceSession>> {
    let sql = format!(
        "SELECT {SESSION_COLS} FROM attendance_sessions
         WHERE class_id = ? AND date >= ? AND date <= ?
         ORDER BY date"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (
                class_id,
                from.format("%Y-%m-%d").to_string(),
                to.format("%Y-%m-%d").to_string(),
            ),
            session_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(|r| assemble(conn, r)).collect()
}

/// Every class's session on one date, ordered by class id.
pub fn list_on_date(conn: &Connection, date: NaiveDate) -> EngineResult<Vec<AttendanceSession>> {
    let sql = format!(
        "SELECT {SESSION_COLS} FROM attendance_sessions WHERE date = ? ORDER BY class_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([date.format("%Y-%m-%d").to_string()], session_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(|r| assemble(conn, r)).collect()
}

/// Sessions holding a record for one student, oldest first, optionally
/// narrowed to a class and a date range.
pub fn list_for_student(
    conn: &Connection,
    student_id: &str,
    class_id: Option<&str>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> EngineResult<Vec<AttendanceSession>> {
    let mut sql = String::from(
        "SELECT s.id, s.class_id, s.date, s.session_type, s.status, s.venue, s.leave_reason, \
         s.holiday_name, s.substitute_teacher_id, s.version, s.finalized_at, s.created_by, \
         s.updated_by, s.created_at, s.updated_at
         FROM attendance_sessions s
         JOIN attendance_records r ON r.session_id = s.id
         WHERE r.student_id = ?",
    );
    let mut args: Vec<String> = vec![student_id.to_string()];
    if let Some(cid) = class_id {
        sql.push_str(" AND s.class_id = ?");
        args.push(cid.to_string());
    }
    if let Some(f) = from {
        sql.push_str(" AND s.date >= ?");
        args.push(f.format("%Y-%m-%d").to_string());
    }
    if let Some(t) = to {
        sql.push_str(" AND s.date <= ?");
        args.push(t.format("%Y-%m-%d").to_string());
    }
    sql.push_str(" ORDER BY s.date");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), session_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(|r| assemble(conn, r)).collect()
}
