use serde_json::json;

use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{date_param, db_conn, optional_date_param, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::report;

fn handle_class_attendance_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let from = match date_param(req, "from") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let to = match date_param(req, "to") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match report::class_attendance_model(conn, &class_id, from, to) {
        Ok(model) => ok(&req.id, json!({ "model": model })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_daily_summary_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = match date_param(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match report::daily_summary_model(conn, date) {
        Ok(model) => ok(&req.id, json!({ "model": model })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_student_history_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_id = optional_str(req, "classId");
    let from = match optional_date_param(req, "from") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let to = match optional_date_param(req, "to") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match report::student_history_model(conn, &student_id, class_id.as_deref(), from, to) {
        Ok(model) => ok(&req.id, json!({ "model": model })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.classAttendanceModel" => Some(handle_class_attendance_model(state, req)),
        "reports.dailySummaryModel" => Some(handle_daily_summary_model(state, req)),
        "reports.studentHistoryModel" => Some(handle_student_history_model(state, req)),
        _ => None,
    }
}
