use crate::engine::{self, NewRecord, RecordAssignment};
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{
    db_conn, grading_policy, optional_str, patch_text, required_i64, required_str,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn handle_records_list(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lrn = match required_str(req, "lrn") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::list_records(conn, &lrn) {
        Ok(records) => ok(&req.id, json!({ "records": records })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_records_get(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record_id = match required_str(req, "recordId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match grading_policy(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record = match engine::get_record(conn, &record_id) {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, e),
    };
    let grades = match engine::record_grades(conn, &record_id) {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, e),
    };
    let summary = engine::record_summary(record.grade_level, &grades, &policy);
    ok(
        &req.id,
        json!({ "record": record, "grades": grades, "summary": summary }),
    )
}

fn handle_records_create(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lrn = match required_str(req, "lrn") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_level = match required_i64(req, "gradeLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_year = match optional_str(req, "schoolYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section_id = match optional_str(req, "sectionId") {
        Ok(v) => v.filter(|s| !s.is_empty()),
        Err(e) => return e,
    };
    let adviser = match optional_str(req, "adviser") {
        Ok(v) => v.filter(|s| !s.is_empty()),
        Err(e) => return e,
    };

    let new = NewRecord {
        lrn,
        grade_level,
        school_year,
        section_id,
        adviser,
    };
    match engine::create_record(conn, &new) {
        Ok((record, created)) => ok(&req.id, json!({ "record": record, "created": created })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_records_assign(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record_id = match required_str(req, "recordId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(params) = req.params.as_object() else {
        return err(&req.id, "bad_params", "params must be an object", None);
    };
    let section_id = match patch_text(params, "sectionId") {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, e),
    };
    let adviser = match patch_text(params, "adviser") {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, e),
    };

    let assignment = RecordAssignment {
        section_id,
        adviser,
    };
    match engine::assign_record(conn, &record_id, &assignment) {
        Ok(record) => ok(&req.id, json!({ "record": record })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_records_retain(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record_id = match required_str(req, "recordId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::retain_record(conn, &record_id) {
        Ok(record) => ok(&req.id, json!({ "record": record })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_records_promote(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record_id = match required_str(req, "recordId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::promote_record(conn, &record_id) {
        Ok((record, transition)) => ok(
            &req.id,
            json!({ "record": record, "transition": transition }),
        ),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_records_advance(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record_id = match required_str(req, "recordId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::promote_transition(conn, &record_id) {
        Ok(transition) => ok(&req.id, json!({ "transition": transition })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_records_clear_override(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record_id = match required_str(req, "recordId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match grading_policy(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::clear_override(conn, &record_id, &policy) {
        Ok(record) => ok(&req.id, json!({ "record": record })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_records_recompute(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record_id = match required_str(req, "recordId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match grading_policy(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::recompute_record(conn, &record_id, &policy) {
        Ok(record) => ok(&req.id, json!({ "record": record })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_records_remedial_subjects(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record_id = match required_str(req, "recordId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match grading_policy(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::remedial_subjects(conn, &record_id, &policy) {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "records.list" => Some(handle_records_list(state, req)),
        "records.get" => Some(handle_records_get(state, req)),
        "records.create" => Some(handle_records_create(state, req)),
        "records.assign" => Some(handle_records_assign(state, req)),
        "records.retain" => Some(handle_records_retain(state, req)),
        "records.promote" => Some(handle_records_promote(state, req)),
        "records.advance" => Some(handle_records_advance(state, req)),
        "records.clearOverride" => Some(handle_records_clear_override(state, req)),
        "records.recompute" => Some(handle_records_recompute(state, req)),
        "records.remedialSubjects" => Some(handle_records_remedial_subjects(state, req)),
        _ => None,
    }
}
