use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{auth_err, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_admin_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(password) = req.params.get("password").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing password", None);
    };

    match auth::authenticate_admin(conn, &username, password) {
        Ok(principal) => ok(
            &req.id,
            json!({
                "admin": {
                    "username": principal.username,
                    "role": principal.role,
                    "name": principal.name,
                }
            }),
        ),
        Err(e) => auth_err(&req.id, &e),
    }
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn
        .prepare("SELECT username, name FROM admins WHERE role = 'teacher' ORDER BY username")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt.query_map([], |row| {
        Ok(json!({
            "username": row.get::<_, String>(0)?,
            "name": row.get::<_, String>(1)?,
        }))
    });
    let teachers: Vec<serde_json::Value> = match rows.and_then(|rows| rows.collect()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "teachers": teachers }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.login" => Some(handle_admin_login(state, req)),
        "teachers.list" => Some(handle_teachers_list(state, req)),
        _ => None,
    }
}
