use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, EngineResult};
use crate::roster::RosterStudent;
use crate::session::{AttendanceRecord, AttendanceStatus, RecordOrigin, SubmittedMark};

/// Which default fills roster students the caller did not mention.
///
/// `Create` assumes the class met and unmentioned students showed up:
/// they fill as present. `Edit` assumes the caller is correcting specific
/// students: anyone without an explicit status, now or earlier, fills as
/// absent. Records a caller once set explicitly are never re-defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPolicy {
    Create,
    Edit,
}

impl FillPolicy {
    fn fill_status(self) -> AttendanceStatus {
        match self {
            FillPolicy::Create => AttendanceStatus::Present,
            FillPolicy::Edit => AttendanceStatus::Absent,
        }
    }
}

fn filled(student_id: &str, status: AttendanceStatus) -> AttendanceRecord {
    AttendanceRecord {
        student_id: student_id.to_string(),
        status,
        origin: RecordOrigin::Filled,
        arrival_time: None,
        late_reason: None,
        absence_reason: None,
        notes: None,
        participation: None,
    }
}

fn from_mark(mark: &SubmittedMark) -> AttendanceRecord {
    AttendanceRecord {
        student_id: mark.student_id.clone(),
        status: mark.status,
        origin: RecordOrigin::Explicit,
        arrival_time: mark.arrival_time.clone(),
        late_reason: mark.late_reason.clone(),
        absence_reason: mark.absence_reason.clone(),
        notes: mark.notes.clone(),
        participation: mark.participation,
    }
}

/// Resolve submitted marks against the roster into a full record set, one
/// record per active student, in roster order.
///
/// Submitted marks win over everything. For the rest, prior explicit
/// records are carried forward untouched, and the gaps fill with the
/// policy default. Marks for students off the active roster are rejected
/// whole; nothing is partially applied.
pub fn resolve(
    roster: &[RosterStudent],
    prior: &[AttendanceRecord],
    submitted: &[SubmittedMark],
    policy: FillPolicy,
) -> EngineResult<Vec<AttendanceRecord>> {
    let roster_ids: HashSet<&str> = roster.iter().map(|s| s.id.as_str()).collect();

    let mut by_student: HashMap<&str, &SubmittedMark> = HashMap::new();
    for mark in submitted {
        if !roster_ids.contains(mark.student_id.as_str()) {
            return Err(EngineError::not_found("student", mark.student_id.clone()));
        }
        if by_student.insert(mark.student_id.as_str(), mark).is_some() {
            return Err(EngineError::invalid(format!(
                "duplicate mark for student {}",
                mark.student_id
            )));
        }
    }

    let prior_explicit: HashMap<&str, &AttendanceRecord> = prior
        .iter()
        .filter(|r| r.origin == RecordOrigin::Explicit)
        .map(|r| (r.student_id.as_str(), r))
        .collect();

    let records = roster
        .iter()
        .map(|student| {
            if let Some(mark) = by_student.get(student.id.as_str()) {
                from_mark(mark)
            } else if let Some(prior) = prior_explicit.get(student.id.as_str()) {
                (*prior).clone()
            } else {
                filled(&student.id, policy.fill_status())
            }
        })
        .collect();
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(ids: &[&str]) -> Vec<RosterStudent> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| RosterStudent {
                id: id.to_string(),
                display_name: format!("Student, {}", id),
                admission_no: None,
                sort_order: i as i64,
            })
            .collect()
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

    #[test]
    fn create_fill_defaults_unmentioned_to_present() {
        let roster = roster(&["s1", "s2", "s3"]);
        let records = resolve(
            &roster,
            &[],
            &[mark("s2", AttendanceStatus::Absent)],
            FillPolicy::Create,
        )
        .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].status, AttendanceStatus::Present);
        assert_eq!(records[0].origin, RecordOrigin::Filled);
        assert_eq!(records[1].status, AttendanceStatus::Absent);
        assert_eq!(records[1].origin, RecordOrigin::Explicit);
        assert_eq!(records[2].status, AttendanceStatus::Present);
    }

    #[test]
    fn edit_fill_keeps_explicit_priors_and_defaults_the_rest_to_absent() {
        let roster = roster(&["s1", "s2", "s3"]);
        let prior = resolve(
            &roster,
            &[],
            &[
                mark("s1", AttendanceStatus::Present),
                mark("s2", AttendanceStatus::Present),
            ],
            FillPolicy::Create,
        )
        .unwrap();
        // s1, s2 explicit present; s3 filled present.
        let records = resolve(
            &roster,
            &prior,
            &[mark("s2", AttendanceStatus::Late)],
            FillPolicy::Edit,
        )
        .unwrap();
        assert_eq!(records[0].status, AttendanceStatus::Present);
        assert_eq!(records[0].origin, RecordOrigin::Explicit);
        assert_eq!(records[1].status, AttendanceStatus::Late);
        assert_eq!(records[2].status, AttendanceStatus::Absent);
        assert_eq!(records[2].origin, RecordOrigin::Filled);
    }

    #[test]
    fn edit_fill_with_empty_marks_redefaults_filled_records() {
        let roster = roster(&["s1", "s2"]);
        let prior = resolve(&roster, &[], &[], FillPolicy::Create).unwrap();
        assert!(prior.iter().all(|r| r.status == AttendanceStatus::Present));

        let records = resolve(&roster, &prior, &[], FillPolicy::Edit).unwrap();
        assert!(records.iter().all(|r| r.status == AttendanceStatus::Absent));
    }

    #[test]
    fn unknown_student_fails_whole_resolve() {
        let roster = roster(&["s1"]);
        let err = resolve(
            &roster,
            &[],
            &[mark("ghost", AttendanceStatus::Present)],
            FillPolicy::Create,
        )
        .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn records_follow_roster_order_not_submission_order() {
        let roster = roster(&["s1", "s2", "s3"]);
        let records = resolve(
            &roster,
            &[],
            &[
                mark("s3", AttendanceStatus::Late),
                mark("s1", AttendanceStatus::Absent),
            ],
            FillPolicy::Create,
        )
        .unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn submitted_annotations_survive_resolution() {
        let roster = roster(&["s1"]);
        let mut m = mark("s1", AttendanceStatus::Late);
        m.arrival_time = Some("08:14".to_string());
        m.late_reason = Some("bus".to_string());
        m.participation = Some(2);
        let records = resolve(&roster, &[], &[m], FillPolicy::Create).unwrap();
        assert_eq!(records[0].arrival_time.as_deref(), Some("08:14"));
        assert_eq!(records[0].late_reason.as_deref(), Some("bus"));
        assert_eq!(records[0].participation, Some(2));
    }

    #[test]
    fn prior_annotations_survive_edits_to_other_students() {
        let roster = roster(&["s1", "s2"]);
        let mut m = mark("s1", AttendanceStatus::Late);
        m.arrival_time = Some("08:20".to_string());
        let prior = resolve(&roster, &[], &[m], FillPolicy::Create).unwrap();

        let records = resolve(
            &roster,
            &prior,
            &[mark("s2", AttendanceStatus::Excused)],
            FillPolicy::Edit,
        )
        .unwrap();
        assert_eq!(records[0].status, AttendanceStatus::Late);
        assert_eq!(records[0].arrival_time.as_deref(), Some("08:20"));
        assert_eq!(records[1].status, AttendanceStatus::Excused);
    }
}
