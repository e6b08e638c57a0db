use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::leave;
use crate::marking::{self, FillPolicy};
use crate::roster;
use crate::session::{
    AttendanceSession, MarkPayload, SessionKind, SessionStatus, SessionType,
};
use crate::store;

/// Apply one markOrUpdate payload to the (class, date) slot.
///
/// Whether this creates or edits is decided here, by the store, never by the
/// caller: no session yet means create, an existing one means merge into it.
/// Finalized sessions reject every write. A payload that resolves to exactly
/// the stored content is a no-op and returns the stored session unchanged,
/// which is what makes blind retries of a lost response safe.
pub fn mark_or_update(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
    payload: &MarkPayload,
    today: NaiveDate,
) -> EngineResult<AttendanceSession> {
    if date > today {
        return Err(EngineError::invalid(format!(
            "attendance cannot be marked for a future date ({})",
            date.format("%Y-%m-%d")
        )));
    }
    if !roster::class_exists(conn, class_id)? {
        return Err(EngineError::not_found("class", class_id));
    }

    match store::get_session(conn, class_id, date)? {
        None => create_session(conn, class_id, date, payload),
        Some(existing) => update_session(conn, existing, payload),
    }
}

/// Kind and status the payload would produce on a fresh (class, date) key.
fn resolve_as_create(
    conn: &Connection,
    class_id: &str,
    payload: &MarkPayload,
) -> EngineResult<(SessionKind, SessionStatus)> {
    match payload.session_type {
        SessionType::Normal => {
            let roster = roster::active_students(conn, class_id)?;
            let records = marking::resolve(&roster, &[], &payload.marks, FillPolicy::Create)?;
            Ok((
                SessionKind::Normal {
                    records,
                    venue: payload.venue.clone(),
                },
                SessionStatus::Active,
            ))
        }
        _ => leave::build_leave_kind(conn, payload),
    }
}

fn create_session(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
    payload: &MarkPayload,
) -> EngineResult<AttendanceSession> {
    // A caller who claims to have seen version N of a session that does not
    // exist is acting on a stale read. expectedVersion 0 or absent both mean
    // "I expect no session".
    if let Some(expected) = payload.expected_version {
        if expected != 0 {
            return Err(EngineError::ConcurrentModification {
                expected,
                actual: 0,
            });
        }
    }

    let (kind, status) = resolve_as_create(conn, class_id, payload)?;

    let now = Utc::now().to_rfc3339();
    let session = AttendanceSession {
        id: Uuid::new_v4().to_string(),
        class_id: class_id.to_string(),
        date,
        kind,
        status,
        version: 1,
        finalized_at: None,
        created_by: payload.marked_by.clone(),
        updated_by: payload.marked_by.clone(),
        created_at: now.clone(),
        updated_at: now,
    };
    store::upsert_session(conn, &session)?;
    tracing::info!(
        class_id = %session.class_id,
        date = %session.date,
        session_type = session.session_type().as_str(),
        records = session.kind.records().len(),
        "created attendance session"
    );
    Ok(session)
}

fn update_session(
    conn: &Connection,
    mut existing: AttendanceSession,
    payload: &MarkPayload,
) -> EngineResult<AttendanceSession> {
    if existing.is_finalized() {
        return Err(EngineError::SessionLocked {
            class_id: existing.class_id.clone(),
            date: existing.date_str(),
        });
    }

    // expectedVersion 0 asserts "no session existed when I read". If the
    // stored session is exactly what this payload creates, the caller's own
    // create landed once already and this is a retry. Anything else lost a
    // race to a different writer.
    if payload.expected_version == Some(0) {
        let (kind, status) = resolve_as_create(conn, &existing.class_id, payload)?;
        if kind == existing.kind && status == existing.status {
            tracing::debug!(
                class_id = %existing.class_id,
                date = %existing.date,
                "create retry matched stored content, no-op"
            );
            return Ok(existing);
        }
        return Err(EngineError::ConcurrentModification {
            expected: 0,
            actual: existing.version,
        });
    }

    let (kind, status) = match payload.session_type {
        SessionType::Normal => {
            let roster = roster::active_students(conn, &existing.class_id)?;
            // Editing an existing normal day corrects it in place. Overwriting
            // a leave day starts attendance from scratch, so the create fill
            // applies.
            let policy = match existing.kind {
                SessionKind::Normal { .. } => FillPolicy::Edit,
                _ => FillPolicy::Create,
            };
            let records =
                marking::resolve(&roster, existing.kind.records(), &payload.marks, policy)?;
            let venue = payload.venue.clone().or_else(|| match &existing.kind {
                SessionKind::Normal { venue, .. } => venue.clone(),
                _ => None,
            });
            (
                SessionKind::Normal { records, venue },
                SessionStatus::Active,
            )
        }
        _ => {
            let prior_records = existing.kind.records().len();
            if prior_records > 0 && !payload.confirm_discard_records {
                return Err(EngineError::invalid(format!(
                    "marking this day as {} discards {} attendance record(s); \
                     set confirmDiscardRecords to proceed",
                    payload.session_type.as_str(),
                    prior_records
                )));
            }
            leave::build_leave_kind(conn, payload)?
        }
    };

    // Idempotent retry: identical content leaves the session untouched, so a
    // client that re-sends after a lost response neither bumps the version
    // nor trips the conflict check below.
    if kind == existing.kind && status == existing.status {
        tracing::debug!(
            class_id = %existing.class_id,
            date = %existing.date,
            version = existing.version,
            "markOrUpdate matched stored content, no-op"
        );
        return Ok(existing);
    }

    if let Some(expected) = payload.expected_version {
        if expected != existing.version {
            tracing::warn!(
                class_id = %existing.class_id,
                date = %existing.date,
                expected,
                actual = existing.version,
                "rejected stale markOrUpdate"
            );
            return Err(EngineError::ConcurrentModification {
                expected,
                actual: existing.version,
            });
        }
    }

    if !kind.conducted() && existing.kind.conducted() {
        tracing::info!(
            class_id = %existing.class_id,
            date = %existing.date,
            discarded = existing.kind.records().len(),
            "normal session re-typed as leave day, records discarded"
        );
    }

    existing.kind = kind;
    existing.status = status;
    existing.version += 1;
    existing.updated_by = payload.marked_by.clone();
    existing.updated_at = Utc::now().to_rfc3339();
    store::upsert_session(conn, &existing)?;
    tracing::info!(
        class_id = %existing.class_id,
        date = %existing.date,
        session_type = existing.session_type().as_str(),
        version = existing.version,
        "updated attendance session"
    );
    Ok(existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::session::{AttendanceStatus, RecordOrigin, SubmittedMark};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn.execute("INSERT INTO classes(id, name) VALUES('c1', '8B')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO students(id, class_id, last_name, first_name, active, sort_order)
             VALUES('s1', 'c1', 'Adams', 'Rita', 1, 0),
                   ('s2', 'c1', 'Ngo', 'Bao', 1, 1),
                   ('s3', 'c1', 'Cole', 'Max', 1, 2)",
            [],
        )
        .unwrap();
        conn
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn normal_payload(marks: Vec<SubmittedMark>) -> MarkPayload {
        MarkPayload {
            session_type: SessionType::Normal,
            marks,
            venue: None,
            reason: None,
            holiday_name: None,
            substitute_teacher_id: None,
            confirm_discard_records: false,
            expected_version: None,
            marked_by: None,
        }
    }

    fn mark(student_id: &str, status: AttendanceStatus) -> SubmittedMark {
        SubmittedMark {
            student_id: student_id.to_string(),
            status,
            arrival_time: None,
            late_reason: None,
            absence_reason: None,
            notes: None,
            participation: None,
        }
    }

    fn statuses(session: &AttendanceSession) -> Vec<AttendanceStatus> {
        session.kind.records().iter().map(|r| r.status).collect()
    }

    #[test]
    fn first_mark_creates_with_present_fill() {
        let conn = test_conn();
        let s = mark_or_update(
            &conn,
            "c1",
            day("2025-03-10"),
            &normal_payload(vec![]),
            day("2025-03-10"),
        )
        .unwrap();
        assert_eq!(s.version, 1);
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(
            statuses(&s),
            vec![
                AttendanceStatus::Present,
                AttendanceStatus::Present,
                AttendanceStatus::Present
            ]
        );
        assert!(s
            .kind
            .records()
            .iter()
            .all(|r| r.origin == RecordOrigin::Filled));
    }

    #[test]
    fn second_mark_edits_the_same_session() {
        let conn = test_conn();
        let d = day("2025-03-10");
        let first = mark_or_update(&conn, "c1", d, &normal_payload(vec![]), d).unwrap();

        let second = mark_or_update(
            &conn,
            "c1",
            d,
            &normal_payload(vec![mark("s2", AttendanceStatus::Absent)]),
            d,
        )
        .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.version, 2);
        // s2 explicit absent, s1/s3 were filled so the edit default applies.
        assert_eq!(
            statuses(&second),
            vec![
                AttendanceStatus::Absent,
                AttendanceStatus::Absent,
                AttendanceStatus::Absent
            ]
        );

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM attendance_sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn edit_keeps_explicit_marks_from_earlier_writes() {
        let conn = test_conn();
        let d = day("2025-03-10");
        mark_or_update(
            &conn,
            "c1",
            d,
            &normal_payload(vec![
                mark("s1", AttendanceStatus::Late),
                mark("s2", AttendanceStatus::Present),
            ]),
            d,
        )
        .unwrap();

        let s = mark_or_update(
            &conn,
            "c1",
            d,
            &normal_payload(vec![mark("s3", AttendanceStatus::Excused)]),
            d,
        )
        .unwrap();
        assert_eq!(
            statuses(&s),
            vec![
                AttendanceStatus::Late,
                AttendanceStatus::Present,
                AttendanceStatus::Excused
            ]
        );
    }

    #[test]
    fn future_dates_are_rejected() {
        let conn = test_conn();
        let err = mark_or_update(
            &conn,
            "c1",
            day("2025-03-11"),
            &normal_payload(vec![]),
            day("2025-03-10"),
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert!(err.to_string().contains("future"));
    }

    #[test]
    fn unknown_class_is_not_found() {
        let conn = test_conn();
        let err = mark_or_update(
            &conn,
            "nope",
            day("2025-03-10"),
            &normal_payload(vec![]),
            day("2025-03-10"),
        )
        .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn retried_edit_is_a_no_op() {
        let conn = test_conn();
        let d = day("2025-03-10");
        mark_or_update(&conn, "c1", d, &normal_payload(vec![]), d).unwrap();

        let mut edit = normal_payload(vec![
            mark("s1", AttendanceStatus::Absent),
            mark("s2", AttendanceStatus::Present),
        ]);
        edit.expected_version = Some(1);
        let applied = mark_or_update(&conn, "c1", d, &edit, d).unwrap();
        assert_eq!(applied.version, 2);

        // The response was lost and the caller re-sends the very same edit.
        // Content already matches, so no bump and no stale-version error even
        // though expectedVersion is now behind.
        let retried = mark_or_update(&conn, "c1", d, &edit, d).unwrap();
        assert_eq!(retried.version, 2);
        assert_eq!(retried.kind, applied.kind);

        let third = mark_or_update(&conn, "c1", d, &edit, d).unwrap();
        assert_eq!(third.version, 2);
    }

    #[test]
    fn stale_expected_version_is_rejected() {
        let conn = test_conn();
        let d = day("2025-03-10");
        mark_or_update(&conn, "c1", d, &normal_payload(vec![]), d).unwrap();
        mark_or_update(
            &conn,
            "c1",
            d,
            &normal_payload(vec![mark("s1", AttendanceStatus::Absent)]),
            d,
        )
        .unwrap();

        // This caller read version 1, but someone else moved it to 2.
        let mut stale = normal_payload(vec![mark("s2", AttendanceStatus::Late)]);
        stale.expected_version = Some(1);
        let err = mark_or_update(&conn, "c1", d, &stale, d).unwrap_err();
        assert_eq!(err.code(), "concurrent_modification");
    }

    #[test]
    fn create_retry_with_version_zero_is_a_no_op() {
        let conn = test_conn();
        let d = day("2025-03-10");
        let mut payload = normal_payload(vec![
            mark("s1", AttendanceStatus::Present),
            mark("s2", AttendanceStatus::Present),
        ]);
        payload.expected_version = Some(0);
        let first = mark_or_update(&conn, "c1", d, &payload, d).unwrap();
        assert_eq!(first.version, 1);
        // s3 filled present by the create policy.
        assert_eq!(statuses(&first)[2], AttendanceStatus::Present);

        // Same payload again, as after a lost response. Still version 1 and
        // s3 stays present: this is the create landing twice, not an edit.
        let second = mark_or_update(&conn, "c1", d, &payload, d).unwrap();
        assert_eq!(second.version, 1);
        assert_eq!(second.kind, first.kind);
    }

    #[test]
    fn create_that_lost_a_race_gets_a_conflict() {
        let conn = test_conn();
        let d = day("2025-03-10");
        mark_or_update(
            &conn,
            "c1",
            d,
            &normal_payload(vec![mark("s1", AttendanceStatus::Absent)]),
            d,
        )
        .unwrap();

        // A second caller also thought the day was unmarked, with different
        // content. They must re-read, not overwrite.
        let mut loser = normal_payload(vec![mark("s2", AttendanceStatus::Absent)]);
        loser.expected_version = Some(0);
        let err = mark_or_update(&conn, "c1", d, &loser, d).unwrap_err();
        assert_eq!(err.code(), "concurrent_modification");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM attendance_sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn expected_version_on_missing_session_is_a_conflict() {
        let conn = test_conn();
        let mut p = normal_payload(vec![]);
        p.expected_version = Some(3);
        let err = mark_or_update(&conn, "c1", day("2025-03-10"), &p, day("2025-03-10"))
            .unwrap_err();
        assert_eq!(err.code(), "concurrent_modification");
    }

    #[test]
    fn leave_over_marked_day_needs_confirmation() {
        let conn = test_conn();
        let d = day("2025-03-10");
        mark_or_update(&conn, "c1", d, &normal_payload(vec![]), d).unwrap();

        let mut leave = normal_payload(vec![]);
        leave.session_type = SessionType::SchoolHoliday;
        leave.reason = Some("snow day".to_string());
        let err = mark_or_update(&conn, "c1", d, &leave, d).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert!(err.to_string().contains("confirmDiscardRecords"));

        leave.confirm_discard_records = true;
        let s = mark_or_update(&conn, "c1", d, &leave, d).unwrap();
        assert_eq!(s.status, SessionStatus::Holiday);
        assert!(s.kind.records().is_empty());
        assert!(!s.conducted());

        let orphans: i64 = conn
            .query_row("SELECT COUNT(*) FROM attendance_records", [], |r| r.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn normal_over_leave_uses_create_fill() {
        let conn = test_conn();
        let d = day("2025-03-10");
        let mut leave = normal_payload(vec![]);
        leave.session_type = SessionType::TeacherLeave;
        leave.reason = Some("medical".to_string());
        mark_or_update(&conn, "c1", d, &leave, d).unwrap();

        let s = mark_or_update(
            &conn,
            "c1",
            d,
            &normal_payload(vec![mark("s1", AttendanceStatus::Absent)]),
            d,
        )
        .unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        assert!(s.conducted());
        // s1 explicit, the rest fill as present because the day restarts.
        assert_eq!(
            statuses(&s),
            vec![
                AttendanceStatus::Absent,
                AttendanceStatus::Present,
                AttendanceStatus::Present
            ]
        );
        assert_eq!(s.version, 2);
    }

    #[test]
    fn leave_to_leave_updates_in_place() {
        let conn = test_conn();
        let d = day("2025-03-10");
        let mut leave = normal_payload(vec![]);
        leave.session_type = SessionType::SchoolHoliday;
        leave.reason = Some("snow".to_string());
        let first = mark_or_update(&conn, "c1", d, &leave, d).unwrap();

        leave.session_type = SessionType::EmergencyClosure;
        leave.reason = Some("flooding".to_string());
        let second = mark_or_update(&conn, "c1", d, &leave, d).unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.version, 2);
        assert_eq!(second.status, SessionStatus::Cancelled);
    }
}
