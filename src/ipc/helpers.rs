use chrono::NaiveDate;
use rusqlite::Connection;

use crate::ipc::error::{engine_err, err};
use crate::ipc::types::{AppState, Request};
use crate::session;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn date_param(req: &Request, key: &str) -> Result<NaiveDate, serde_json::Value> {
    let raw = required_str(req, key)?;
    session::parse_date(&raw).map_err(|e| engine_err(&req.id, &e))
}

pub fn optional_date_param(req: &Request, key: &str) -> Result<Option<NaiveDate>, serde_json::Value> {
    match optional_str(req, key) {
        None => Ok(None),
        Some(raw) => session::parse_date(&raw)
            .map(Some)
            .map_err(|e| engine_err(&req.id, &e)),
    }
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}
