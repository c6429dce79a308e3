use crate::engine;
use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, optional_bool, required_date, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn handle_years_list(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::list_years(conn) {
        Ok(years) => ok(&req.id, json!({ "years": years })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_years_create(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let label = match required_str(req, "yearLabel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let start = match required_date(req, "startDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let end = match required_date(req, "endDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let make_current = match optional_bool(req, "isCurrent") {
        Ok(v) => v.unwrap_or(false),
        Err(e) => return e,
    };
    match engine::create_year(conn, &label, start, end, make_current) {
        Ok(year) => ok(&req.id, json!({ "year": year })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_years_set_current(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let year_id = match required_str(req, "yearId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::set_current_year(conn, &year_id) {
        Ok(year) => ok(&req.id, json!({ "year": year })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_years_current(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::current_year(conn) {
        Ok(year) => ok(&req.id, json!({ "year": year })),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "years.list" => Some(handle_years_list(state, req)),
        "years.create" => Some(handle_years_create(state, req)),
        "years.setCurrent" => Some(handle_years_set_current(state, req)),
        "years.current" => Some(handle_years_current(state, req)),
        _ => None,
    }
}
