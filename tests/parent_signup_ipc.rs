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
    let exe = env!("CARGO_BIN_EXE_trackerd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn trackerd");
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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
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

fn error_code(value: &serde_json::Value) -> Option<&str> {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value.pointer("/error/code").and_then(|v| v.as_str())
}

fn register_params(name: &str, email: &str) -> serde_json::Value {
    json!({
        "name": name,
        "email": email,
        "phone": "555-0100",
        "childName": "Jane Doe",
        "childGrade": "11",
        "relationship": "Mother",
        "password": "secret99",
    })
}

#[test]
fn parent_signup_linkage_and_grade_access() {
    let workspace = temp_dir("trackerd-signup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.add",
        json!({ "adminUsername": "admin", "name": "Jane Doe", "grade": "11", "section": "A" }),
    );
    let student_id = added.get("studentId").and_then(|v| v.as_str()).unwrap().to_string();
    let child_code = added
        .pointer("/student/childCode")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.updateSubjects",
        json!({
            "adminUsername": "admin",
            "studentId": student_id,
            "subjects": [
                { "title": "Math", "quarter": "Q1", "written": 85, "performance": 90, "quarterly": 80 }
            ]
        }),
    );

    // Registration validation.
    let mut short_pw = register_params("Maria Cruz", "maria@example.com");
    short_pw["password"] = json!("short");
    let resp = request(&mut stdin, &mut reader, "4", "parents.register", short_pw);
    assert_eq!(error_code(&resp), Some("bad_params"));
    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "parents.register",
        register_params("Maria Cruz", "not-an-email"),
    );
    assert_eq!(error_code(&resp), Some("bad_params"));

    let registered = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "parents.register",
        register_params("Maria Cruz", "maria@example.com"),
    );
    let signup_code = registered
        .get("signupCode")
        .and_then(|v| v.as_str())
        .expect("signup code")
        .to_string();
    assert_eq!(signup_code.len(), 12);

    let duplicate = request(
        &mut stdin,
        &mut reader,
        "7",
        "parents.register",
        register_params("Maria Again", "maria@example.com"),
    );
    assert_eq!(error_code(&duplicate), Some("email_taken"));

    // Freshly registered: code unused, nothing linked, no grade access yet.
    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "parents.get",
        json!({ "email": "maria@example.com" }),
    );
    assert_eq!(
        profile.pointer("/parent/signupCodeUsed").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        profile.pointer("/parent/linkedChildren").and_then(|v| v.as_array()).map(Vec::len),
        Some(0)
    );
    let premature = request(
        &mut stdin,
        &mut reader,
        "9",
        "grades.get",
        json!({ "parentEmail": "maria@example.com", "childCode": child_code }),
    );
    assert_eq!(error_code(&premature), Some("not_authorized"));

    // Signup triple must match exactly.
    let wrong_name = request(
        &mut stdin,
        &mut reader,
        "10",
        "signup.verify",
        json!({
            "email": "maria@example.com",
            "fullName": "Marla Cruz",
            "signupCode": signup_code,
            "childCodes": [child_code],
        }),
    );
    assert_eq!(error_code(&wrong_name), Some("invalid_credentials"));

    // One invalid code aborts the whole signup; nothing is persisted.
    let partial = request(
        &mut stdin,
        &mut reader,
        "11",
        "signup.verify",
        json!({
            "email": "maria@example.com",
            "fullName": "Maria Cruz",
            "signupCode": signup_code,
            "childCodes": [child_code, "BOGUSBOGUSBOGUS1"],
        }),
    );
    assert_eq!(error_code(&partial), Some("invalid_child_code"));
    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "parents.get",
        json!({ "email": "maria@example.com" }),
    );
    assert_eq!(
        profile.pointer("/parent/signupCodeUsed").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        profile.pointer("/parent/linkedChildren").and_then(|v| v.as_array()).map(Vec::len),
        Some(0)
    );

    let verified = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "signup.verify",
        json!({
            "email": "maria@example.com",
            "fullName": "Maria Cruz",
            "signupCode": signup_code,
            "childCodes": [child_code],
        }),
    );
    assert_eq!(
        verified.pointer("/parent/linkedChildren/0").and_then(|v| v.as_str()),
        Some(child_code.as_str())
    );

    // One-shot: the same code cannot activate twice, linkage is untouched.
    let reused = request(
        &mut stdin,
        &mut reader,
        "14",
        "signup.verify",
        json!({
            "email": "maria@example.com",
            "fullName": "Maria Cruz",
            "signupCode": signup_code,
            "childCodes": [child_code],
        }),
    );
    assert_eq!(error_code(&reused), Some("code_already_used"));
    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "parents.get",
        json!({ "email": "maria@example.com" }),
    );
    assert_eq!(
        profile.pointer("/parent/linkedChildren/0").and_then(|v| v.as_str()),
        Some(child_code.as_str())
    );

    let login = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "parents.login",
        json!({ "email": "maria@example.com", "password": "secret99" }),
    );
    assert_eq!(
        login.pointer("/parent/linkedChildren/0").and_then(|v| v.as_str()),
        Some(child_code.as_str())
    );

    let grades = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "grades.get",
        json!({ "parentEmail": "maria@example.com", "childCode": child_code }),
    );
    assert_eq!(
        grades.pointer("/student/name").and_then(|v| v.as_str()),
        Some("Jane Doe")
    );
    assert_eq!(
        grades.pointer("/student/subjects/0/title").and_then(|v| v.as_str()),
        Some("Math")
    );
    assert_eq!(
        grades.pointer("/student/subjects/0/final").and_then(|v| v.as_f64()),
        Some(86.5)
    );
    assert_eq!(
        grades.pointer("/student/average").and_then(|v| v.as_f64()),
        Some(86.5)
    );

    // A second parent holding the code but not linked to it is refused.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "parents.register",
        register_params("Other Parent", "other@example.com"),
    );
    let stranger = request(
        &mut stdin,
        &mut reader,
        "19",
        "grades.get",
        json!({ "parentEmail": "other@example.com", "childCode": child_code }),
    );
    assert_eq!(error_code(&stranger), Some("not_authorized"));

    // Deleting the student orphans the linkage; reads now say not_found.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "students.delete",
        json!({ "adminUsername": "admin", "studentId": student_id }),
    );
    let orphaned = request(
        &mut stdin,
        &mut reader,
        "21",
        "grades.get",
        json!({ "parentEmail": "maria@example.com", "childCode": child_code }),
    );
    assert_eq!(error_code(&orphaned), Some("not_found"));

    let _ = std::fs::remove_dir_all(workspace);
}
