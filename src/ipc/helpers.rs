use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::calc::{self, Rating};
use crate::config::{self, GradingPolicy, PlacementPolicy};
use crate::engine;
use crate::error::{EngineError, EngineResult};
use crate::ipc::error::{engine_err, err};
use crate::ipc::types::{AppState, Request};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Absent and null both read as `None`; any other non-string is rejected.
pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a string", key),
            None,
        )),
    }
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing integer {}", key), None))
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be an integer", key),
                None,
            )
        }),
    }
}

pub fn optional_bool(req: &Request, key: &str) -> Result<Option<bool>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| {
            err(&req.id, "bad_params", format!("{} must be a boolean", key), None)
        }),
    }
}

pub fn required_date(req: &Request, key: &str) -> Result<NaiveDate, Value> {
    let raw = required_str(req, key)?;
    engine::parse_iso_date(key, &raw).map_err(|e| engine_err(&req.id, e))
}

pub fn patch_obj<'a>(req: &'a Request) -> Result<&'a Map<String, Value>, Value> {
    req.params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| err(&req.id, "bad_params", "patch must be an object", None))
}

/// Tri-state score field: absent, explicit null (clear), or a score.
pub fn patch_rating(obj: &Map<String, Value>, key: &str) -> EngineResult<Option<Option<Rating>>> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(v) => calc::parse_score(key, v).map(|r| Some(Some(r))),
    }
}

pub fn patch_date(obj: &Map<String, Value>, key: &str) -> EngineResult<Option<Option<NaiveDate>>> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(s)) => engine::parse_iso_date(key, s).map(|d| Some(Some(d))),
        Some(_) => Err(EngineError::validation(
            key,
            format!("{} must be a YYYY-MM-DD date or null", key),
        )),
    }
}

pub fn patch_text(obj: &Map<String, Value>, key: &str) -> EngineResult<Option<Option<String>>> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(s)) => Ok(Some(Some(s.clone()))),
        Some(_) => Err(EngineError::validation(
            key,
            format!("{} must be a string or null", key),
        )),
    }
}

/// Reject patch keys outside `allowed`.
pub fn check_patch_keys(obj: &Map<String, Value>, allowed: &[&str]) -> EngineResult<()> {
    match obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(k) => Err(EngineError::validation(
            k.as_str(),
            format!("{} cannot be patched", k),
        )),
        None => Ok(()),
    }
}

pub fn grading_policy(conn: &Connection, req: &Request) -> Result<GradingPolicy, Value> {
    config::load_grading_policy(conn)
        .map_err(|e| err(&req.id, "db_query_failed", format!("{e:#}"), None))
}

pub fn placement_policy(conn: &Connection, req: &Request) -> Result<PlacementPolicy, Value> {
    config::load_placement_policy(conn)
        .map_err(|e| err(&req.id, "db_query_failed", format!("{e:#}"), None))
}
