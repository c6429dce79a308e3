use crate::engine::{self, NewStudent, StudentPatch};
use crate::error::EngineError;
use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{
    check_patch_keys, db_conn, optional_str, patch_obj, required_date, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Sex, StudentStatus};
use serde_json::{json, Map, Value};

fn parse_sex(raw: &str) -> Result<Sex, EngineError> {
    Sex::parse(&raw.to_ascii_uppercase())
        .ok_or_else(|| EngineError::validation("sex", "sex must be one of: M, F"))
}

fn parse_status(raw: &str) -> Result<StudentStatus, EngineError> {
    StudentStatus::parse(&raw.to_ascii_uppercase()).ok_or_else(|| {
        EngineError::validation(
            "status",
            "status must be one of: PENDING, ENROLLED, TRANSFERRED, DROPPED, GRADUATED",
        )
    })
}

fn handle_students_list(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match optional_str(req, "status") {
        Ok(None) => None,
        Ok(Some(raw)) => match parse_status(&raw) {
            Ok(s) => Some(s),
            Err(e) => return engine_err(&req.id, e),
        },
        Err(e) => return e,
    };
    match engine::list_students(conn, status) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lrn = match required_str(req, "lrn") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::get_student(conn, &lrn) {
        Ok(student) => ok(
            &req.id,
            json!({ "student": student, "fullName": student.full_name() }),
        ),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lrn = match required_str(req, "lrn") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let middle_name = match optional_str(req, "middleName") {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return e,
    };
    let name_extension = match optional_str(req, "nameExtension") {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return e,
    };
    let birthdate = match required_date(req, "birthdate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sex = match required_str(req, "sex") {
        Ok(raw) => match parse_sex(&raw) {
            Ok(s) => s,
            Err(e) => return engine_err(&req.id, e),
        },
        Err(e) => return e,
    };

    let new = NewStudent {
        lrn,
        last_name,
        first_name,
        middle_name,
        name_extension,
        birthdate,
        sex,
    };
    match engine::create_student(conn, &new) {
        Ok(student) => ok(&req.id, json!({ "student": student })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn parse_student_patch(patch: &Map<String, Value>) -> Result<StudentPatch, EngineError> {
    check_patch_keys(
        patch,
        &[
            "lastName",
            "firstName",
            "middleName",
            "nameExtension",
            "birthdate",
            "sex",
        ],
    )?;
    let text = |key: &str| -> Result<Option<String>, EngineError> {
        match patch.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(EngineError::validation(
                key,
                format!("{} must be a string", key),
            )),
        }
    };
    let birthdate = match text("birthdate")? {
        Some(raw) => Some(engine::parse_iso_date("birthdate", &raw)?),
        None => None,
    };
    let sex = match text("sex")? {
        Some(raw) => Some(parse_sex(&raw)?),
        None => None,
    };
    Ok(StudentPatch {
        last_name: text("lastName")?,
        first_name: text("firstName")?,
        middle_name: text("middleName")?,
        name_extension: text("nameExtension")?,
        birthdate,
        sex,
    })
}

fn handle_students_update(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lrn = match required_str(req, "lrn") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match patch_obj(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match parse_student_patch(patch) {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, e),
    };
    match engine::update_student(conn, &lrn, &patch) {
        Ok(student) => ok(&req.id, json!({ "student": student })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_students_set_status(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lrn = match required_str(req, "lrn") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match required_str(req, "status") {
        Ok(raw) => match parse_status(&raw) {
            Ok(s) => s,
            Err(e) => return engine_err(&req.id, e),
        },
        Err(e) => return e,
    };
    match engine::set_student_status(conn, &lrn, status) {
        Ok(student) => ok(&req.id, json!({ "student": student })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lrn = match required_str(req, "lrn") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match engine::delete_student(conn, &lrn) {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.setStatus" => Some(handle_students_set_status(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
