use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{auth_err, required_str};
use crate::ipc::types::{AppState, Request};
use crate::{auth, calc, codes, db};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;

fn plausible_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.contains(char::is_whitespace)
}

fn signup_code_taken(conn: &Connection, code: &str) -> anyhow::Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM parents WHERE signup_code = ?1", [code], |_| {
            Ok(())
        })
        .optional()?;
    Ok(found.is_some())
}

fn is_unique_violation(e: &rusqlite::Error, column: &str) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, Some(msg))
            if f.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains(column)
    )
}

fn handle_parents_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let phone = match required_str(req, "phone") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let child_name = match required_str(req, "childName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let child_grade = match required_str(req, "childGrade") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let relationship = match required_str(req, "relationship") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(password) = req.params.get("password").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing password", None);
    };

    if password.len() < MIN_PASSWORD_LEN {
        return err(
            &req.id,
            "bad_params",
            format!("password must be at least {} characters", MIN_PASSWORD_LEN),
            None,
        );
    }
    if !plausible_email(&email) {
        return err(&req.id, "bad_params", "invalid email format", None);
    }

    let existing = conn
        .query_row("SELECT 1 FROM parents WHERE email = ?1", [&email], |_| {
            Ok(())
        })
        .optional();
    match existing {
        Ok(Some(())) => return err(&req.id, "email_taken", "email already registered", None),
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let password_hash = match auth::hash_password(password) {
        Ok(h) => h,
        Err(e) => return auth_err(&req.id, &e),
    };

    // New accounts start unlinked; signup.verify consumes the code later.
    loop {
        let signup_code =
            match codes::unique_code(codes::generate_signup_code, |c| signup_code_taken(conn, c)) {
                Ok(c) => c,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
        let parent_id = Uuid::new_v4().to_string();
        let inserted = conn.execute(
            "INSERT INTO parents(id, name, email, phone, child_name, child_grade, relationship,
                                 password_hash, signup_code, signup_code_used, linked_children, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, '[]', ?10)",
            (
                &parent_id,
                &name,
                &email,
                &phone,
                &child_name,
                &child_grade,
                &relationship,
                &password_hash,
                &signup_code,
                db::now_datetime(),
            ),
        );
        return match inserted {
            Ok(_) => ok(
                &req.id,
                json!({ "parentId": parent_id, "signupCode": signup_code }),
            ),
            Err(e) if is_unique_violation(&e, "signup_code") => continue,
            Err(e) if is_unique_violation(&e, "email") => {
                err(&req.id, "email_taken", "email already registered", None)
            }
            Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
        };
    }
}

fn handle_parents_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(password) = req.params.get("password").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing password", None);
    };

    match auth::authenticate_parent(conn, &email, password) {
        Ok(p) => ok(
            &req.id,
            json!({
                "parent": {
                    "name": p.name,
                    "email": p.email,
                    "childName": p.child_name,
                    "linkedChildren": p.linked_children,
                }
            }),
        ),
        Err(e) => auth_err(&req.id, &e),
    }
}

fn handle_parents_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let row = conn
        .query_row(
            "SELECT id, name, email, phone, child_name, child_grade, relationship,
                    signup_code, signup_code_used, linked_children, created_at
             FROM parents WHERE email = ?1",
            [&email],
            |row| {
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "name": row.get::<_, String>(1)?,
                    "email": row.get::<_, String>(2)?,
                    "phone": row.get::<_, String>(3)?,
                    "childName": row.get::<_, String>(4)?,
                    "childGrade": row.get::<_, String>(5)?,
                    "relationship": row.get::<_, String>(6)?,
                    "signupCode": row.get::<_, String>(7)?,
                    "signupCodeUsed": row.get::<_, i64>(8)? != 0,
                    "linkedChildren": auth::parse_linked_children(&row.get::<_, String>(9)?),
                    "createdAt": row.get::<_, String>(10)?,
                }))
            },
        )
        .optional();
    match row {
        Ok(Some(parent)) => ok(&req.id, json!({ "parent": parent })),
        Ok(None) => err(&req.id, "not_found", "parent not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_signup_verify(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let signup_code = match required_str(req, "signupCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let child_codes: Vec<String> = req
        .params
        .get("childCodes")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    match auth::verify_signup(conn, &email, &full_name, &signup_code, &child_codes) {
        Ok(linked) => ok(
            &req.id,
            json!({
                "parent": {
                    "email": linked.email,
                    "name": linked.name,
                    "linkedChildren": linked.linked_children,
                }
            }),
        ),
        Err(e) => auth_err(&req.id, &e),
    }
}

fn handle_grades_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let parent_email = match required_str(req, "parentEmail") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let child_code = match required_str(req, "childCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // The linkage check is the sole gate on a child's grades.
    match auth::authorize_child_access(conn, &parent_email, &child_code) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_authorized",
                "you do not have access to this child's grades",
                None,
            )
        }
        Err(e) => return auth_err(&req.id, &e),
    }

    let row = conn
        .query_row(
            "SELECT name, grade, section, subjects FROM students WHERE child_code = ?1",
            [&child_code],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional();
    let (name, grade, section, subjects_raw) = match row {
        Ok(Some(v)) => v,
        // A linked code whose student was since deleted.
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let views = calc::resolve_subjects(&subjects_raw);
    let subjects: Vec<Value> = views.iter().map(calc::SubjectView::to_json).collect();
    let average = calc::compute_average(&views);

    ok(
        &req.id,
        json!({
            "student": {
                "name": name,
                "grade": grade,
                "section": section,
                "subjects": subjects,
                "average": average,
            }
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "parents.register" => Some(handle_parents_register(state, req)),
        "parents.login" => Some(handle_parents_login(state, req)),
        "parents.get" => Some(handle_parents_get(state, req)),
        "signup.verify" => Some(handle_signup_verify(state, req)),
        "grades.get" => Some(handle_grades_get(state, req)),
        _ => None,
    }
}
