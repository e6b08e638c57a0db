use rusqlite::{Connection, OptionalExtension};

use crate::error::{EngineError, EngineResult};

/// One active roster member, in marking order.
#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub id: String,
    pub display_name: String,
    pub admission_no: Option<String>,
    pub sort_order: i64,
}

/// One active teacher, for substitute validation and directory listings.
#[derive(Debug, Clone)]
pub struct DirectoryTeacher {
    pub id: String,
    pub display_name: String,
}

pub fn class_exists(conn: &Connection, class_id: &str) -> EngineResult<bool> {
    let found = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub fn class_name(conn: &Connection, class_id: &str) -> EngineResult<String> {
    conn.query_row(
        "SELECT name FROM classes WHERE id = ?",
        [class_id],
        |row| row.get::<_, String>(0),
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("class", class_id))
}

/// Active students of a class in roster order. This is the set every normal
/// session's records must cover.
pub fn active_students(conn: &Connection, class_id: &str) -> EngineResult<Vec<RosterStudent>> {
    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name, admission_no, sort_order
         FROM students
         WHERE class_id = ? AND active = 1
         ORDER BY sort_order, last_name, first_name",
    )?;
    let students = stmt
        .query_map([class_id], |row| {
            let last: String = row.get(1)?;
            let first: String = row.get(2)?;
            Ok(RosterStudent {
                id: row.get(0)?,
                display_name: format!("{}, {}", last, first),
                admission_no: row.get(3)?,
                sort_order: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

#[derive(Debug, Clone)]
pub struct StudentIdentity {
    pub id: String,
    pub class_id: String,
    pub display_name: String,
    pub admission_no: Option<String>,
    pub active: bool,
}

pub fn find_student(conn: &Connection, student_id: &str) -> EngineResult<Option<StudentIdentity>> {
    let row = conn
        .query_row(
            "SELECT id, class_id, last_name, first_name, admission_no, active
             FROM students WHERE id = ?",
            [student_id],
            |row| {
                let last: String = row.get(2)?;
                let first: String = row.get(3)?;
                Ok(StudentIdentity {
                    id: row.get(0)?,
                    class_id: row.get(1)?,
                    display_name: format!("{}, {}", last, first),
                    admission_no: row.get(4)?,
                    active: row.get::<_, i64>(5)? != 0,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn active_teacher_exists(conn: &Connection, teacher_id: &str) -> EngineResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM teachers WHERE id = ? AND active = 1",
            [teacher_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn active_teachers(conn: &Connection) -> EngineResult<Vec<DirectoryTeacher>> {
    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name FROM teachers
         WHERE active = 1 ORDER BY last_name, first_name",
    )?;
    let teachers = stmt
        .query_map([], |row| {
            let last: String = row.get(1)?;
            let first: String = row.get(2)?;
            Ok(DirectoryTeacher {
                id: row.get(0)?,
                display_name: format!("{}, {}", last, first),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(teachers)
}
