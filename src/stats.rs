use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::roster::{self, RosterStudent, StudentIdentity};
use crate::session::{
    AttendanceRecord, AttendanceSession, AttendanceStatus, SessionStatus, SessionType,
};
use crate::store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Late => self.late += 1,
            AttendanceStatus::Excused => self.excused += 1,
        }
    }

    pub fn total(&self) -> i64 {
        self.present + self.absent + self.late + self.excused
    }

    /// Late arrivals count as attending. Every percentage in the system
    /// takes its numerator from here so the convention lives in one place.
    pub fn attended(&self) -> i64 {
        self.present + self.late
    }
}

pub fn count_records(records: &[AttendanceRecord]) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for r in records {
        counts.add(r.status);
    }
    counts
}

/// Integer percentage, nearest-rounded, zero when the denominator is zero.
pub fn percentage(attended: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    (100.0 * attended as f64 / total as f64).round() as i64
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionStatistics {
    pub counts: StatusCounts,
    pub percentage: i64,
}

pub fn session_statistics(records: &[AttendanceRecord]) -> SessionStatistics {
    let counts = count_records(records);
    SessionStatistics {
        counts,
        percentage: percentage(counts.attended(), counts.total()),
    }
}

/// One roster student's totals across the conducted sessions of a range.
/// The percentage denominator is the conducted session count, so a student
/// with no record in some conducted session (joined mid-range) reads as
/// having missed it.
#[derive(Debug, Clone)]
pub struct StudentRangeTotals {
    pub student: RosterStudent,
    pub counts: StatusCounts,
    pub percentage: i64,
}

#[derive(Debug, Clone)]
pub struct ClassRangeStats {
    pub sessions: Vec<AttendanceSession>,
    pub conducted_sessions: i64,
    pub per_student: Vec<StudentRangeTotals>,
}

/// Attendance for one class over an inclusive date range. Leave days appear
/// in `sessions` but contribute to no denominator.
pub fn class_range_stats(
    conn: &Connection,
    class_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> EngineResult<ClassRangeStats> {
    if !roster::class_exists(conn, class_id)? {
        return Err(EngineError::not_found("class", class_id));
    }
    let sessions = store::list_for_class(conn, class_id, from, to)?;
    let roster = roster::active_students(conn, class_id)?;

    let conducted_sessions = sessions.iter().filter(|s| s.conducted()).count() as i64;
    let mut per_student = Vec::with_capacity(roster.len());
    for student in roster {
        let mut counts = StatusCounts::default();
        for session in sessions.iter().filter(|s| s.conducted()) {
            if let Some(record) = session
                .kind
                .records()
                .iter()
                .find(|r| r.student_id == student.id)
            {
                counts.add(record.status);
            }
        }
        let pct = percentage(counts.attended(), conducted_sessions);
        per_student.push(StudentRangeTotals {
            student,
            counts,
            percentage: pct,
        });
    }

    Ok(ClassRangeStats {
        sessions,
        conducted_sessions,
        per_student,
    })
}

#[derive(Debug, Clone)]
pub struct DailyClassEntry {
    pub class_name: String,
    pub session: AttendanceSession,
}

#[derive(Debug, Clone)]
pub struct DailyStats {
    pub entries: Vec<DailyClassEntry>,
    pub conducted_classes: i64,
    pub average_percentage: i64,
}

/// Every class's session on one date. The grand average is the unweighted
/// mean of the conducted sessions' percentages; classes on leave that day are
/// left out of it entirely rather than dragged in as 0%.
pub fn daily_stats(conn: &Connection, date: NaiveDate) -> EngineResult<DailyStats> {
    let sessions = store::list_on_date(conn, date)?;
    let mut entries = Vec::with_capacity(sessions.len());
    let mut pct_sum: i64 = 0;
    let mut conducted_classes: i64 = 0;
    for session in sessions {
        let class_name = roster::class_name(conn, &session.class_id)?;
        if session.conducted() {
            conducted_classes += 1;
            pct_sum += session_statistics(session.kind.records()).percentage;
        }
        entries.push(DailyClassEntry {
            class_name,
            session,
        });
    }
    let average_percentage = if conducted_classes > 0 {
        (pct_sum as f64 / conducted_classes as f64).round() as i64
    } else {
        0
    };
    Ok(DailyStats {
        entries,
        conducted_classes,
        average_percentage,
    })
}

#[derive(Debug, Clone)]
pub struct StudentSessionEntry {
    pub session_id: String,
    pub class_id: String,
    pub class_name: String,
    pub date: NaiveDate,
    pub session_type: SessionType,
    pub session_status: SessionStatus,
    pub record: AttendanceRecord,
}

#[derive(Debug, Clone)]
pub struct StudentHistoryStats {
    pub student: StudentIdentity,
    pub totals: StatusCounts,
    pub percentage: i64,
    pub entries: Vec<StudentSessionEntry>,
}

/// A student's records in chronological order, optionally narrowed to one
/// class and a date range. Only sessions holding a record for the student
/// contribute, and those are conducted sessions by construction.
pub fn student_history(
    conn: &Connection,
    student_id: &str,
    class_id: Option<&str>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> EngineResult<StudentHistoryStats> {
    let Some(student) = roster::find_student(conn, student_id)? else {
        return Err(EngineError::not_found("student", student_id));
    };
    if let Some(cid) = class_id {
        if !roster::class_exists(conn, cid)? {
            return Err(EngineError::not_found("class", cid));
        }
    }

    let sessions = store::list_for_student(conn, student_id, class_id, from, to)?;
    let mut totals = StatusCounts::default();
    let mut entries = Vec::with_capacity(sessions.len());
    for session in sessions {
        let Some(record) = session
            .kind
            .records()
            .iter()
            .find(|r| r.student_id == student_id)
            .cloned()
        else {
            continue;
        };
        totals.add(record.status);
        entries.push(StudentSessionEntry {
            session_id: session.id.clone(),
            class_id: session.class_id.clone(),
            class_name: roster::class_name(conn, &session.class_id)?,
            date: session.date,
            session_type: session.session_type(),
            session_status: session.status,
            record,
        });
    }

    let pct = percentage(totals.attended(), totals.total());
    Ok(StudentHistoryStats {
        student,
        totals,
        percentage: pct,
        entries,
    })
}
