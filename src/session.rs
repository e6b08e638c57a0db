use std::collections::HashSet;

use chrono::NaiveDate;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};

/// Closed set of day types a class can be marked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Normal,
    TeacherLeave,
    SchoolHoliday,
    InstitutionalHoliday,
    EmergencyClosure,
}

impl SessionType {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::Normal => "normal",
            SessionType::TeacherLeave => "teacher-leave",
            SessionType::SchoolHoliday => "school-holiday",
            SessionType::InstitutionalHoliday => "institutional-holiday",
            SessionType::EmergencyClosure => "emergency-closure",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "normal" => Some(SessionType::Normal),
            "teacher-leave" => Some(SessionType::TeacherLeave),
            "school-holiday" => Some(SessionType::SchoolHoliday),
            "institutional-holiday" => Some(SessionType::InstitutionalHoliday),
            "emergency-closure" => Some(SessionType::EmergencyClosure),
            _ => None,
        }
    }

    /// Every type except `normal` is a leave day: the class did not meet and
    /// no per-student records exist for it.
    pub fn is_leave(self) -> bool {
        !matches!(self, SessionType::Normal)
    }
}

/// Lifecycle state of a session. `active` and `completed` belong to normal
/// sessions; the rest are terminal states assigned when a leave day is
/// recorded. `postponed` is accepted from stored data for forward
/// compatibility but is never produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Completed,
    Holiday,
    TeacherLeave,
    Cancelled,
    Postponed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Holiday => "holiday",
            SessionStatus::TeacherLeave => "teacher-leave",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Postponed => "postponed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(SessionStatus::Active),
            "completed" => Some(SessionStatus::Completed),
            "holiday" => Some(SessionStatus::Holiday),
            "teacher-leave" => Some(SessionStatus::TeacherLeave),
            "cancelled" => Some(SessionStatus::Cancelled),
            "postponed" => Some(SessionStatus::Postponed),
            _ => None,
        }
    }
}

/// Per-student attendance status. The set is closed; anything else is
/// rejected at the payload boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }
}

/// Whether a record's status was submitted by the caller or filled in by
/// policy. Fill defaults apply only to `filled` records on later edits;
/// `explicit` records are never re-defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOrigin {
    Explicit,
    Filled,
}

impl RecordOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordOrigin::Explicit => "explicit",
            RecordOrigin::Filled => "filled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "explicit" => Some(RecordOrigin::Explicit),
            "filled" => Some(RecordOrigin::Filled),
            _ => None,
        }
    }
}

/// One student's status within a normal session.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub status: AttendanceStatus,
    pub origin: RecordOrigin,
    pub arrival_time: Option<String>,
    pub late_reason: Option<String>,
    pub absence_reason: Option<String>,
    pub notes: Option<String>,
    pub participation: Option<i64>,
}

/// Kind-specific session content. A normal session carries records and never
/// a leave reason; a leave session carries a reason and never records.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionKind {
    Normal {
        records: Vec<AttendanceRecord>,
        venue: Option<String>,
    },
    TeacherLeave {
        reason: String,
        substitute_teacher_id: Option<String>,
    },
    SchoolHoliday {
        reason: String,
        holiday_name: Option<String>,
    },
    InstitutionalHoliday {
        reason: String,
        holiday_name: Option<String>,
    },
    EmergencyClosure {
        reason: String,
    },
}

impl SessionKind {
    pub fn session_type(&self) -> SessionType {
        match self {
            SessionKind::Normal { .. } => SessionType::Normal,
            SessionKind::TeacherLeave { .. } => SessionType::TeacherLeave,
            SessionKind::SchoolHoliday { .. } => SessionType::SchoolHoliday,
            SessionKind::InstitutionalHoliday { .. } => SessionType::InstitutionalHoliday,
            SessionKind::EmergencyClosure { .. } => SessionType::EmergencyClosure,
        }
    }

    /// Only normal sessions count toward attendance denominators.
    pub fn conducted(&self) -> bool {
        matches!(self, SessionKind::Normal { .. })
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        match self {
            SessionKind::Normal { records, .. } => records,
            _ => &[],
        }
    }
}

/// A class's attendance for one calendar date. At most one of these exists
/// per (class, date); the store enforces that with a unique index.
#[derive(Debug, Clone)]
pub struct AttendanceSession {
    pub id: String,
    pub class_id: String,
    pub date: NaiveDate,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub version: i64,
    pub finalized_at: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AttendanceSession {
    pub fn session_type(&self) -> SessionType {
        self.kind.session_type()
    }

    pub fn conducted(&self) -> bool {
        self.kind.conducted()
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.status, SessionStatus::Completed)
    }

    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

/// One submitted mark inside a markOrUpdate payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedMark {
    pub student_id: String,
    pub status: AttendanceStatus,
    pub arrival_time: Option<String>,
    pub late_reason: Option<String>,
    pub absence_reason: Option<String>,
    pub notes: Option<String>,
    pub participation: Option<i64>,
}

/// Parsed markOrUpdate payload. `marks` may cover any subset of the roster;
/// the marking engine fills the rest.
#[derive(Debug, Clone)]
pub struct MarkPayload {
    pub session_type: SessionType,
    pub marks: Vec<SubmittedMark>,
    pub venue: Option<String>,
    pub reason: Option<String>,
    pub holiday_name: Option<String>,
    pub substitute_teacher_id: Option<String>,
    pub confirm_discard_records: bool,
    pub expected_version: Option<i64>,
    pub marked_by: Option<String>,
}

pub fn parse_date(raw: &str) -> EngineResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| EngineError::invalid(format!("date must be YYYY-MM-DD, got '{raw}'")))
}

fn opt_string(params: &Value, key: &str) -> EngineResult<Option<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
        Some(_) => Err(EngineError::invalid(format!("{key} must be a string"))),
    }
}

fn opt_i64(params: &Value, key: &str) -> EngineResult<Option<i64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| EngineError::invalid(format!("{key} must be an integer"))),
    }
}

fn opt_bool(params: &Value, key: &str) -> EngineResult<bool> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(EngineError::invalid(format!("{key} must be a boolean"))),
    }
}

fn parse_mark(entry: &Value) -> EngineResult<SubmittedMark> {
    let Some(obj) = entry.as_object() else {
        return Err(EngineError::invalid("each mark must be an object"));
    };
    let Some(student_id) = obj.get("studentId").and_then(|v| v.as_str()) else {
        return Err(EngineError::invalid("mark is missing studentId"));
    };
    let Some(status_raw) = obj.get("status").and_then(|v| v.as_str()) else {
        return Err(EngineError::invalid(format!(
            "mark for student {student_id} is missing status"
        )));
    };
    let Some(status) = AttendanceStatus::parse(status_raw) else {
        return Err(EngineError::invalid(format!(
            "unknown attendance status '{status_raw}' (expected present, absent, late or excused)"
        )));
    };
    Ok(SubmittedMark {
        student_id: student_id.to_string(),
        status,
        arrival_time: opt_string(entry, "arrivalTime")?,
        late_reason: opt_string(entry, "lateReason")?,
        absence_reason: opt_string(entry, "absenceReason")?,
        notes: opt_string(entry, "notes")?,
        participation: opt_i64(entry, "participation")?,
    })
}

/// Parse and validate the wire payload for attendance.markOrUpdate.
/// Everything outside the closed vocabularies is rejected here so the
/// engine below only ever sees well-formed input.
pub fn parse_mark_payload(params: &Value) -> EngineResult<MarkPayload> {
    let Some(type_raw) = params.get("sessionType").and_then(|v| v.as_str()) else {
        return Err(EngineError::invalid("sessionType is required"));
    };
    let Some(session_type) = SessionType::parse(type_raw) else {
        return Err(EngineError::invalid(format!(
            "unknown sessionType '{type_raw}' (expected normal, teacher-leave, school-holiday, \
             institutional-holiday or emergency-closure)"
        )));
    };

    let mut marks = Vec::new();
    match params.get("marks") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            let mut seen: HashSet<String> = HashSet::new();
            for entry in items {
                let mark = parse_mark(entry)?;
                if !seen.insert(mark.student_id.clone()) {
                    return Err(EngineError::invalid(format!(
                        "duplicate mark for student {}",
                        mark.student_id
                    )));
                }
                marks.push(mark);
            }
        }
        Some(_) => return Err(EngineError::invalid("marks must be an array")),
    }

    if session_type.is_leave() && !marks.is_empty() {
        return Err(EngineError::invalid(
            "leave sessions carry no attendance records; omit marks",
        ));
    }

    let expected_version = opt_i64(params, "expectedVersion")?;
    if let Some(v) = expected_version {
        if v < 0 {
            return Err(EngineError::invalid("expectedVersion must be >= 0"));
        }
    }

    Ok(MarkPayload {
        session_type,
        marks,
        venue: opt_string(params, "venue")?,
        reason: opt_string(params, "reason")?,
        holiday_name: opt_string(params, "holidayName")?,
        substitute_teacher_id: opt_string(params, "substituteTeacherId")?,
        confirm_discard_records: opt_bool(params, "confirmDiscardRecords")?,
        expected_version,
        marked_by: opt_string(params, "markedBy")?,
    })
}
