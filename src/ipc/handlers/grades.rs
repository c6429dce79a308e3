use crate::engine::{self, GradePatch};
use crate::error::{EngineError, EngineResult};
use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{
    check_patch_keys, db_conn, grading_policy, patch_date, patch_obj, patch_rating, required_str,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

const QUARTER_KEYS: [&str; 4] = ["quarter1", "quarter2", "quarter3", "quarter4"];

const PATCHABLE: [&str; 8] = [
    "quarter1",
    "quarter2",
    "quarter3",
    "quarter4",
    "remedialMark",
    "remedialConductedFrom",
    "remedialConductedTo",
    "remarks",
];

fn parse_grade_patch(patch: &Map<String, Value>) -> EngineResult<GradePatch> {
    for derived in ["finalRating", "recomputedFinalGrade", "needsRemedial"] {
        if patch.contains_key(derived) {
            return Err(EngineError::validation(
                derived,
                format!("{} is derived and cannot be set", derived),
            ));
        }
    }
    check_patch_keys(patch, &PATCHABLE)?;

    let mut out = GradePatch::default();
    for (slot, key) in out.quarters.iter_mut().zip(QUARTER_KEYS) {
        *slot = patch_rating(patch, key)?;
    }
    out.remedial_mark = patch_rating(patch, "remedialMark")?;
    out.remedial_conducted_from = patch_date(patch, "remedialConductedFrom")?;
    out.remedial_conducted_to = patch_date(patch, "remedialConductedTo")?;
    out.remarks = match patch.get("remarks") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(EngineError::validation("remarks", "remarks must be a string"));
        }
    };
    Ok(out)
}

fn handle_grades_update(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_id = match required_str(req, "gradeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match patch_obj(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match parse_grade_patch(patch) {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, e),
    };
    let policy = match grading_policy(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::update_subject_grade(conn, &grade_id, &patch, &policy) {
        Ok((grade, record)) => ok(&req.id, json!({ "grade": grade, "record": record })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_grades_add(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record_id = match required_str(req, "recordId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let area_id = match required_str(req, "learningAreaId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match grading_policy(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::add_subject_grade(conn, &record_id, &area_id, &policy) {
        Ok((grade, record)) => ok(&req.id, json!({ "grade": grade, "record": record })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_grades_delete(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_id = match required_str(req, "gradeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match grading_policy(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::delete_subject_grade(conn, &grade_id, &policy) {
        Ok(record) => ok(&req.id, json!({ "deleted": true, "record": record })),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "grades.update" => Some(handle_grades_update(state, req)),
        "grades.add" => Some(handle_grades_add(state, req)),
        "grades.delete" => Some(handle_grades_delete(state, req)),
        _ => None,
    }
}
