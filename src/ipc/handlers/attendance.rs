use chrono::Local;
use serde_json::json;

use crate::finalize;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{date_param, db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::reconcile;
use crate::report;
use crate::session;
use crate::store;

fn handle_mark_or_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let date = match date_param(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let payload = match session::parse_mark_payload(&req.params) {
        Ok(p) => p,
        Err(e) => return engine_err(&req.id, &e),
    };

    // "Today" is decided at the boundary so the engine stays clock-free.
    let today = Local::now().date_naive();
    match reconcile::mark_or_update(conn, &class_id, date, &payload, today) {
        Ok(session) => ok(&req.id, json!({ "session": report::session_model(&session) })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let date = match date_param(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match store::get_session(conn, &class_id, date) {
        Ok(Some(session)) => ok(&req.id, json!({ "session": report::session_model(&session) })),
        Ok(None) => err(
            &req.id,
            "not_found",
            "no attendance session for this class and date",
            Some(json!({ "classId": class_id, "date": date.format("%Y-%m-%d").to_string() })),
        ),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_finalize(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let date = match date_param(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let finalized_by = optional_str(req, "finalizedBy");

    match finalize::finalize(conn, &class_id, date, finalized_by.as_deref()) {
        Ok(session) => ok(&req.id, json!({ "session": report::session_model(&session) })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.markOrUpdate" => Some(handle_mark_or_update(state, req)),
        "attendance.get" => Some(handle_get(state, req)),
        "attendance.finalize" => Some(handle_finalize(state, req)),
        _ => None,
    }
}
