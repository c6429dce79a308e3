use crate::engine;
use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::SchoolProfile;
use serde_json::{json, Value};

fn handle_school_get(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::get_school(conn) {
        Ok(school) => ok(
            &req.id,
            json!({ "configured": school.is_some(), "school": school }),
        ),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_school_configure(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let text = |key: &str| optional_str(req, key).map(Option::unwrap_or_default);
    let address = match text("address") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let district = match text("district") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let division = match text("division") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let region = match text("region") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let profile = SchoolProfile {
        school_id,
        name,
        address,
        district,
        division,
        region,
    };
    match engine::configure_school(conn, &profile) {
        Ok(school) => ok(&req.id, json!({ "configured": true, "school": school })),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "school.get" => Some(handle_school_get(state, req)),
        "school.configure" => Some(handle_school_configure(state, req)),
        _ => None,
    }
}
