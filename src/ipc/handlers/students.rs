use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{auth_err, required_str};
use crate::ipc::types::{AppState, Request};
use crate::{auth, calc, codes, db};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn is_unique_violation(e: &rusqlite::Error, column: &str) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, Some(msg))
            if f.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains(column)
    )
}

fn child_code_taken(conn: &Connection, code: &str) -> anyhow::Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM students WHERE child_code = ?1", [code], |_| {
            Ok(())
        })
        .optional()?;
    Ok(found.is_some())
}

/// Issues a fresh child code and inserts the student row. The pre-check plus
/// the UNIQUE constraint together close the generate/insert race: losing the
/// insert regenerates and tries again.
fn insert_student(
    conn: &Connection,
    name: &str,
    grade: &str,
    section: &str,
    created_by: &str,
) -> anyhow::Result<(String, String, String)> {
    loop {
        let code = codes::unique_code(codes::generate_child_code, |c| child_code_taken(conn, c))?;
        let id = Uuid::new_v4().to_string();
        let created_at = db::now_datetime();
        let inserted = conn.execute(
            "INSERT INTO students(id, name, grade, section, child_code, subjects, created_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, '[]', ?6, ?7)",
            (&id, name, grade, section, &code, &created_at, created_by),
        );
        match inserted {
            Ok(_) => return Ok((id, code, created_at)),
            Err(e) if is_unique_violation(&e, "child_code") => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Validates one incoming subject row and normalizes it for storage. The
/// final score is always recomputed here; a caller-supplied value is ignored.
fn normalize_subject(raw: &Value) -> Result<Value, String> {
    let title = raw
        .get("title")
        .or_else(|| raw.get("subject"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "subject title is required".to_string())?;
    let quarter = raw
        .get("quarter")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let component = |key: &str| -> Result<f64, String> {
        raw.get(key)
            .and_then(calc::score_value)
            .ok_or_else(|| format!("{}: {} score must be a number", title, key))
    };
    let written = component("written")?;
    let performance = component("performance")?;
    let quarterly = component("quarterly")?;
    let final_score = calc::compute_final(written, performance, quarterly)
        .map_err(|e| format!("{}: {}", title, e.message))?;

    Ok(json!({
        "title": title,
        "quarter": quarter,
        "written": written,
        "performance": performance,
        "quarterly": quarterly,
        "final": final_score,
    }))
}

fn normalize_subjects(raw: &Value) -> Result<Vec<Value>, String> {
    let items = raw
        .as_array()
        .ok_or_else(|| "subjects must be an array".to_string())?;
    items.iter().map(normalize_subject).collect()
}

fn student_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let subjects_raw: String = row.get(5)?;
    let views = calc::resolve_subjects(&subjects_raw);
    let subjects: Vec<Value> = views.iter().map(calc::SubjectView::to_json).collect();
    let average = calc::compute_average(&views);
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "grade": row.get::<_, String>(2)?,
        "section": row.get::<_, String>(3)?,
        "childCode": row.get::<_, String>(4)?,
        "subjects": subjects,
        "average": average,
        "createdAt": row.get::<_, String>(6)?,
        "updatedAt": row.get::<_, Option<String>>(7)?,
        "createdBy": row.get::<_, String>(8)?,
    }))
}

const STUDENT_COLUMNS: &str =
    "id, name, grade, section, child_code, subjects, created_at, updated_at, created_by";

fn fetch_student(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<Value>> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE id = ?1", STUDENT_COLUMNS),
        [student_id],
        |row| student_row_json(row),
    )
    .optional()
}

fn require_staff_param<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<(&'a Connection, auth::StaffPrincipal), serde_json::Value> {
    let Some(conn) = state.db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let username = required_str(req, "adminUsername")?;
    let staff = auth::require_staff(conn, &username).map_err(|e| auth_err(&req.id, &e))?;
    Ok((conn, staff))
}

fn handle_students_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, staff) = match require_staff_param(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let grade = match required_str(req, "grade") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let section = match required_str(req, "section") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let (id, child_code, created_at) =
        match insert_student(conn, &name, &grade, &section, &staff.username) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
        };

    ok(
        &req.id,
        json!({
            "studentId": id,
            "student": {
                "id": id,
                "name": name,
                "grade": grade,
                "section": section,
                "childCode": child_code,
                "subjects": [],
                "average": null,
                "createdAt": created_at,
                "updatedAt": null,
                "createdBy": staff.username,
            }
        }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _staff) = match require_staff_param(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(&format!(
        "SELECT {} FROM students ORDER BY created_at DESC, rowid DESC",
        STUDENT_COLUMNS
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt.query_map([], |row| student_row_json(row));
    let students: Vec<Value> = match rows.and_then(|rows| rows.collect()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "students": students }))
}

fn handle_students_update_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _staff) = match require_staff_param(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(subjects_raw) = req.params.get("subjects") else {
        return err(&req.id, "bad_params", "missing subjects", None);
    };

    // Validate the whole list before touching the row; a rejected list leaves
    // prior state intact.
    let normalized = match normalize_subjects(subjects_raw) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let subjects_json = Value::Array(normalized).to_string();

    // Whole-list replacement as one conditional row update.
    let updated = conn.execute(
        "UPDATE students SET subjects = ?1, updated_at = ?2 WHERE id = ?3",
        (&subjects_json, db::now_datetime(), &student_id),
    );
    match updated {
        Ok(0) => return err(&req.id, "not_found", "student not found", None),
        Ok(_) => {}
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    }

    match fetch_student(conn, &student_id) {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _staff) = match require_staff_param(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Parent linkage is intentionally not retracted; a later grades.get for
    // the orphaned code reports not_found.
    match conn.execute("DELETE FROM students WHERE id = ?1", [&student_id]) {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.add" => Some(handle_students_add(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.updateSubjects" => Some(handle_students_update_subjects(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
