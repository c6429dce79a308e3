use crate::engine;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{db_conn, optional_i64, placement_policy, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn handle_sections_list(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_level = match optional_i64(req, "gradeLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let placement = match placement_policy(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::list_sections(conn, grade_level, &placement) {
        Ok(sections) => ok(&req.id, json!({ "sections": sections })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_sections_create(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_level = match required_i64(req, "gradeLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let placement = match placement_policy(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Omitted takes the configured default; null means unlimited.
    let max_students = match req.params.get("maxStudents") {
        None => Some(placement.default_section_capacity),
        Some(Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(n) => Some(n),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "maxStudents must be an integer or null",
                    None,
                )
            }
        },
    };

    let created = engine::create_section(conn, grade_level, &name, max_students)
        .and_then(|s| engine::section_occupancy(conn, s, &placement));
    match created {
        Ok(section) => ok(&req.id, json!({ "section": section })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_sections_delete(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::delete_section(conn, &section_id) {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "sections.list" => Some(handle_sections_list(state, req)),
        "sections.create" => Some(handle_sections_create(state, req)),
        "sections.delete" => Some(handle_sections_delete(state, req)),
        _ => None,
    }
}
