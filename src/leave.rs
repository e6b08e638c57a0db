use rusqlite::Connection;

use crate::error::{EngineError, EngineResult};
use crate::roster;
use crate::session::{MarkPayload, SessionKind, SessionStatus, SessionType};

/// Build the kind and terminal status for a leave-day payload. Leave days
/// skip the active phase entirely: the status assigned here is the one the
/// session keeps.
pub fn build_leave_kind(
    conn: &Connection,
    payload: &MarkPayload,
) -> EngineResult<(SessionKind, SessionStatus)> {
    let Some(reason) = payload.reason.clone() else {
        return Err(EngineError::invalid(format!(
            "{} sessions require a reason",
            payload.session_type.as_str()
        )));
    };

    match payload.session_type {
        SessionType::TeacherLeave => {
            if let Some(sub) = payload.substitute_teacher_id.as_deref() {
                if !roster::active_teacher_exists(conn, sub)? {
                    return Err(EngineError::not_found("teacher", sub));
                }
            }
            Ok((
                SessionKind::TeacherLeave {
                    reason,
                    substitute_teacher_id: payload.substitute_teacher_id.clone(),
                },
                SessionStatus::TeacherLeave,
            ))
        }
        SessionType::SchoolHoliday => Ok((
            SessionKind::SchoolHoliday {
                reason,
                holiday_name: payload.holiday_name.clone(),
            },
            SessionStatus::Holiday,
        )),
        SessionType::InstitutionalHoliday => Ok((
            SessionKind::InstitutionalHoliday {
                reason,
                holiday_name: payload.holiday_name.clone(),
            },
            SessionStatus::Holiday,
        )),
        SessionType::EmergencyClosure => Ok((
            SessionKind::EmergencyClosure { reason },
            SessionStatus::Cancelled,
        )),
        SessionType::Normal => Err(EngineError::invalid(
            "normal is not a leave session type",
        )),
    }
}
