use crate::engine::{self, AreaPatch, NewLearningArea};
use crate::error::EngineError;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{
    check_patch_keys, db_conn, optional_i64, optional_str, patch_obj, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Applicability, AreaKind};
use serde_json::{json, Value};

fn parse_applicability(req: &Request) -> Result<Applicability, Value> {
    let raw = match req.params.get("applicableGrades") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(err(
                &req.id,
                "bad_params",
                "missing applicableGrades",
                None,
            ))
        }
    };
    Applicability::parse(&raw).ok_or_else(|| {
        engine_err(
            &req.id,
            EngineError::validation("applicableGrades", "applicableGrades must be 7..=10 or ALL"),
        )
    })
}

fn parse_kind(field: &str, raw: &str) -> Result<AreaKind, EngineError> {
    AreaKind::parse(raw)
        .ok_or_else(|| EngineError::validation(field, "kind must be one of: core, optional"))
}

fn handle_areas_list(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_level = match optional_i64(req, "gradeLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::list_areas(conn, grade_level) {
        Ok(areas) => ok(&req.id, json!({ "areas": areas })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_areas_create(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let applicability = match parse_applicability(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let kind = match optional_str(req, "kind") {
        Ok(None) => AreaKind::Core,
        Ok(Some(raw)) => match parse_kind("kind", &raw) {
            Ok(k) => k,
            Err(e) => return engine_err(&req.id, e),
        },
        Err(e) => return e,
    };
    let sort_order = match optional_i64(req, "sortOrder") {
        Ok(v) => v.unwrap_or(0),
        Err(e) => return e,
    };

    let new = NewLearningArea {
        code,
        name,
        applicability,
        kind,
        sort_order,
    };
    match engine::create_area(conn, &new) {
        Ok(area) => ok(&req.id, json!({ "area": area })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn parse_area_patch(patch: &serde_json::Map<String, Value>) -> Result<AreaPatch, EngineError> {
    check_patch_keys(patch, &["name", "kind", "sortOrder"])?;
    let mut out = AreaPatch::default();
    if let Some(v) = patch.get("name") {
        let s = v
            .as_str()
            .ok_or_else(|| EngineError::validation("name", "name must be a string"))?;
        out.name = Some(s.to_string());
    }
    if let Some(v) = patch.get("kind") {
        let s = v
            .as_str()
            .ok_or_else(|| EngineError::validation("kind", "kind must be a string"))?;
        out.kind = Some(parse_kind("kind", s)?);
    }
    if let Some(v) = patch.get("sortOrder") {
        out.sort_order = Some(
            v.as_i64()
                .ok_or_else(|| EngineError::validation("sortOrder", "sortOrder must be an integer"))?,
        );
    }
    Ok(out)
}

fn handle_areas_update(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let area_id = match required_str(req, "areaId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match patch_obj(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match parse_area_patch(patch) {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, e),
    };
    match engine::update_area(conn, &area_id, &patch) {
        Ok(area) => ok(&req.id, json!({ "area": area })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_areas_delete(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let area_id = match required_str(req, "areaId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::delete_area(conn, &area_id) {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "areas.list" => Some(handle_areas_list(state, req)),
        "areas.create" => Some(handle_areas_create(state, req)),
        "areas.update" => Some(handle_areas_update(state, req)),
        "areas.delete" => Some(handle_areas_delete(state, req)),
        _ => None,
    }
}
