use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollcalld");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollcalld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({ "id": "t", "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn result(resp: Value) -> Value {
    assert_eq!(resp["ok"], true, "expected ok, got {}", resp);
    resp["result"].clone()
}

fn error_code(resp: &Value) -> String {
    assert_eq!(resp["ok"], false, "expected error, got {}", resp);
    resp["error"]["code"].as_str().unwrap_or_default().to_string()
}

/// Workspace with one class of three students, returning the ids.
fn seed_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> (String, Vec<String>) {
    let _ = result(request(
        stdin,
        reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    ));
    let class = result(request(stdin, reader, "classes.create", json!({ "name": "8B" })));
    let class_id = class["classId"].as_str().unwrap().to_string();

    let mut student_ids = Vec::new();
    for (last, first) in [("Adams", "Rita"), ("Ngo", "Bao"), ("Cole", "Max")] {
        let s = result(request(
            stdin,
            reader,
            "students.create",
            json!({ "classId": class_id, "lastName": last, "firstName": first }),
        ));
        student_ids.push(s["studentId"].as_str().unwrap().to_string());
    }
    (class_id, student_ids)
}

fn record_status(session: &Value, student_id: &str) -> String {
    session["records"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["studentId"] == student_id)
        .unwrap_or_else(|| panic!("no record for {}", student_id))["status"]
        .as_str()
        .unwrap()
        .to_string()
}

#[test]
fn first_mark_creates_and_fills_present() {
    let workspace = tempfile::tempdir().expect("temp workspace");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, students) = seed_class(&mut stdin, &mut reader, workspace.path());

    // Two explicit presents out of three students: the create fill marks
    // the third present too.
    let marked = result(request(
        &mut stdin,
        &mut reader,
        "attendance.markOrUpdate",
        json!({
            "classId": class_id,
            "date": "2025-03-10",
            "sessionType": "normal",
            "marks": [
                { "studentId": students[0], "status": "present" },
                { "studentId": students[1], "status": "present" }
            ]
        }),
    ));
    let session = &marked["session"];
    assert_eq!(session["status"], "active");
    assert_eq!(session["conductedFlag"], true);
    assert_eq!(session["version"], 1);
    assert_eq!(session["records"].as_array().unwrap().len(), 3);
    assert_eq!(record_status(session, &students[2]), "present");
    assert_eq!(session["statistics"]["counts"]["present"], 3);
    assert_eq!(session["statistics"]["percentage"], 100);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn edit_fills_unconfirmed_students_absent() {
    let workspace = tempfile::tempdir().expect("temp workspace");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, students) = seed_class(&mut stdin, &mut reader, workspace.path());

    let created = result(request(
        &mut stdin,
        &mut reader,
        "attendance.markOrUpdate",
        json!({
            "classId": class_id,
            "date": "2025-03-10",
            "sessionType": "normal",
            "marks": [
                { "studentId": students[0], "status": "present" },
                { "studentId": students[1], "status": "present" }
            ]
        }),
    ));
    let session_id = created["session"]["id"].as_str().unwrap().to_string();

    // Re-submitting the same two students edits the existing session; the
    // third was only ever a filled default, so it now reads absent.
    let edited = result(request(
        &mut stdin,
        &mut reader,
        "attendance.markOrUpdate",
        json!({
            "classId": class_id,
            "date": "2025-03-10",
            "sessionType": "normal",
            "marks": [
                { "studentId": students[0], "status": "present" },
                { "studentId": students[1], "status": "present" }
            ]
        }),
    ));
    let session = &edited["session"];
    assert_eq!(session["id"], session_id.as_str());
    assert_eq!(session["version"], 2);
    assert_eq!(record_status(session, &students[2]), "absent");
    assert_eq!(session["statistics"]["counts"]["present"], 2);
    assert_eq!(session["statistics"]["counts"]["absent"], 1);
    assert_eq!(session["statistics"]["percentage"], 67);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn repeated_marks_never_create_a_second_session() {
    let workspace = tempfile::tempdir().expect("temp workspace");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, students) = seed_class(&mut stdin, &mut reader, workspace.path());

    let mut ids = std::collections::HashSet::new();
    for status in ["present", "absent", "late"] {
        let marked = result(request(
            &mut stdin,
            &mut reader,
            "attendance.markOrUpdate",
            json!({
                "classId": class_id,
                "date": "2025-03-10",
                "sessionType": "normal",
                "marks": [{ "studentId": students[0], "status": status }]
            }),
        ));
        ids.insert(marked["session"]["id"].as_str().unwrap().to_string());
    }
    assert_eq!(ids.len(), 1);

    let model = result(request(
        &mut stdin,
        &mut reader,
        "reports.classAttendanceModel",
        json!({ "classId": class_id, "from": "2025-03-01", "to": "2025-03-31" }),
    ));
    assert_eq!(model["model"]["sessions"].as_array().unwrap().len(), 1);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn explicit_marks_survive_partial_edits() {
    let workspace = tempfile::tempdir().expect("temp workspace");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, students) = seed_class(&mut stdin, &mut reader, workspace.path());

    let _ = result(request(
        &mut stdin,
        &mut reader,
        "attendance.markOrUpdate",
        json!({
            "classId": class_id,
            "date": "2025-03-10",
            "sessionType": "normal",
            "marks": [
                { "studentId": students[0], "status": "late", "arrivalTime": "08:14", "lateReason": "bus" },
                { "studentId": students[1], "status": "present" }
            ]
        }),
    ));

    let edited = result(request(
        &mut stdin,
        &mut reader,
        "attendance.markOrUpdate",
        json!({
            "classId": class_id,
            "date": "2025-03-10",
            "sessionType": "normal",
            "marks": [{ "studentId": students[2], "status": "excused" }]
        }),
    ));
    let session = &edited["session"];
    // Explicit marks from the earlier write keep their status and notes.
    assert_eq!(record_status(session, &students[0]), "late");
    assert_eq!(session["records"][0]["arrivalTime"], "08:14");
    assert_eq!(session["records"][0]["origin"], "explicit");
    assert_eq!(record_status(session, &students[1]), "present");
    assert_eq!(record_status(session, &students[2]), "excused");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn bad_payloads_are_rejected_without_side_effects() {
    let workspace = tempfile::tempdir().expect("temp workspace");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, students) = seed_class(&mut stdin, &mut reader, workspace.path());

    let bad_status = request(
        &mut stdin,
        &mut reader,
        "attendance.markOrUpdate",
        json!({
            "classId": class_id,
            "date": "2025-03-10",
            "sessionType": "normal",
            "marks": [{ "studentId": students[0], "status": "tardy" }]
        }),
    );
    assert_eq!(error_code(&bad_status), "invalid_input");

    let ghost_class = request(
        &mut stdin,
        &mut reader,
        "attendance.markOrUpdate",
        json!({ "classId": "ghost", "date": "2025-03-10", "sessionType": "normal" }),
    );
    assert_eq!(error_code(&ghost_class), "not_found");

    let ghost_student = request(
        &mut stdin,
        &mut reader,
        "attendance.markOrUpdate",
        json!({
            "classId": class_id,
            "date": "2025-03-10",
            "sessionType": "normal",
            "marks": [{ "studentId": "ghost", "status": "present" }]
        }),
    );
    assert_eq!(error_code(&ghost_student), "not_found");

    // None of the rejects left a session behind.
    let fetched = request(
        &mut stdin,
        &mut reader,
        "attendance.get",
        json!({ "classId": class_id, "date": "2025-03-10" }),
    );
    assert_eq!(error_code(&fetched), "not_found");

    drop(stdin);
    let _ = child.wait();
}
