use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_sfportald");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sfportald");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

fn open_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, prefix: &str) {
    let workspace = temp_dir(prefix);
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        stdin,
        reader,
        "area",
        "areas.create",
        json!({ "code": "MATH", "name": "Mathematics", "applicableGrades": "ALL" }),
    );
    request_ok(
        stdin,
        reader,
        "student",
        "students.create",
        json!({
            "lrn": "501234560001",
            "lastName": "Bautista",
            "firstName": "Carlo",
            "birthdate": "2009-02-11",
            "sex": "M"
        }),
    );
}

fn create_record(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    grade_level: i64,
    school_year: &str,
) -> (String, String) {
    let created = request_ok(
        stdin,
        reader,
        "record",
        "records.create",
        json!({ "lrn": "501234560001", "gradeLevel": grade_level, "schoolYear": school_year }),
    );
    let record_id = created["record"]["id"].as_str().expect("record id").to_string();
    let got = request_ok(
        stdin,
        reader,
        "record-get",
        "records.get",
        json!({ "recordId": record_id }),
    );
    let grade_id = got["grades"][0]["id"].as_str().expect("grade id").to_string();
    (record_id, grade_id)
}

fn student_status(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let got = request_ok(
        stdin,
        reader,
        "student-get",
        "students.get",
        json!({ "lrn": "501234560001" }),
    );
    got["student"]["status"].as_str().expect("status").to_string()
}

#[test]
fn advance_is_idempotent_and_enrolls_into_next_year() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, "sfportal-advance");
    assert_eq!(student_status(&mut stdin, &mut reader), "PENDING");

    let (record_id, _) = create_record(&mut stdin, &mut reader, 7, "2024-2025");
    assert_eq!(student_status(&mut stdin, &mut reader), "ENROLLED");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "records.advance",
        json!({ "recordId": record_id }),
    );
    assert_eq!(first["transition"]["kind"], json!("next"));
    assert_eq!(first["transition"]["created"], json!(true));
    assert_eq!(first["transition"]["record"]["gradeLevel"], json!(8));
    assert_eq!(first["transition"]["record"]["schoolYear"], json!("2025-2026"));
    assert_eq!(first["transition"]["record"]["sectionId"], json!(null));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "records.advance",
        json!({ "recordId": record_id }),
    );
    assert_eq!(second["transition"]["created"], json!(false));
    assert_eq!(
        second["transition"]["record"]["id"],
        first["transition"]["record"]["id"]
    );

    let source = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "records.get",
        json!({ "recordId": record_id }),
    );
    assert_eq!(source["record"]["remarks"], json!(null));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "records.list",
        json!({ "lrn": "501234560001" }),
    );
    assert_eq!(listed["records"].as_array().map(|a| a.len()), Some(2));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn promoting_grade_ten_graduates_without_next_record() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, "sfportal-graduation");
    let (record_id, _) = create_record(&mut stdin, &mut reader, 10, "2024-2025");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "records.promote",
        json!({ "recordId": record_id }),
    );
    assert_eq!(res["record"]["remarks"], json!("PROMOTED"));
    assert_eq!(res["record"]["remarksLocked"], json!(true));
    assert_eq!(res["transition"]["kind"], json!("final"));
    assert_eq!(res["transition"]["graduated"], json!(true));
    assert_eq!(student_status(&mut stdin, &mut reader), "GRADUATED");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "records.list",
        json!({ "lrn": "501234560001" }),
    );
    assert_eq!(listed["records"].as_array().map(|a| a.len()), Some(1));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "students.setStatus",
        json!({ "lrn": "501234560001", "status": "DROPPED" }),
    );
    assert_eq!(e["code"], json!("status_locked"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn manual_retention_is_sticky_until_cleared() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, "sfportal-override");
    let (record_id, grade_id) = create_record(&mut stdin, &mut reader, 8, "2024-2025");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.update",
        json!({
            "gradeId": grade_id,
            "patch": { "quarter1": 90, "quarter2": 91, "quarter3": 92, "quarter4": 93 }
        }),
    );
    assert_eq!(res["record"]["remarks"], json!("PROMOTED"));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "records.retain",
        json!({ "recordId": record_id }),
    );
    assert_eq!(res["record"]["remarks"], json!("RETAINED"));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.update",
        json!({ "gradeId": grade_id, "patch": { "quarter4": 95 } }),
    );
    assert_eq!(res["record"]["remarks"], json!("RETAINED"));
    assert_eq!(res["record"]["generalAverage"].as_f64(), Some(92.0));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "records.recompute",
        json!({ "recordId": record_id }),
    );
    assert_eq!(res["record"]["remarks"], json!("RETAINED"));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "records.clearOverride",
        json!({ "recordId": record_id }),
    );
    assert_eq!(res["record"]["remarks"], json!("PROMOTED"));
    assert_eq!(res["record"]["remarksLocked"], json!(false));
    assert_eq!(student_status(&mut stdin, &mut reader), "ENROLLED");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unparseable_school_year_is_carried_forward() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, "sfportal-year-fallback");
    let (record_id, _) = create_record(&mut stdin, &mut reader, 9, "SY 2024");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "records.promote",
        json!({ "recordId": record_id }),
    );
    assert_eq!(res["transition"]["record"]["gradeLevel"], json!(10));
    assert_eq!(res["transition"]["record"]["schoolYear"], json!("SY 2024"));

    drop(stdin);
    let _ = child.wait();
}
