use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::reports;
use serde_json::{json, Value};

fn handle_reports_sf10_model(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lrn = match required_str(req, "lrn") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match reports::sf10_model(conn, &lrn) {
        Ok(model) => ok(&req.id, json!(model)),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_reports_remarks_summary_model(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_year = match optional_str(req, "schoolYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match reports::remarks_summary_model(conn, school_year.as_deref()) {
        Ok(model) => ok(&req.id, json!(model)),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "reports.sf10Model" => Some(handle_reports_sf10_model(state, req)),
        "reports.remarksSummaryModel" => Some(handle_reports_remarks_summary_model(state, req)),
        _ => None,
    }
}
