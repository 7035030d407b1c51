use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{auth_err, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::{auth, db};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, sender_email, sender_name, child_name, teacher_username,
                               subject, content, type, status, timestamp, timestamp_unix";

fn message_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "sender": row.get::<_, String>(1)?,
        "senderName": row.get::<_, String>(2)?,
        "childName": row.get::<_, String>(3)?,
        "teacherUsername": row.get::<_, Option<String>>(4)?,
        "subject": row.get::<_, String>(5)?,
        "content": row.get::<_, String>(6)?,
        "type": row.get::<_, String>(7)?,
        "status": row.get::<_, String>(8)?,
        "timestamp": row.get::<_, String>(9)?,
        "timestampUnix": row.get::<_, i64>(10)?,
    }))
}

fn teacher_exists(conn: &Connection, username: &str) -> rusqlite::Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM admins WHERE username = ?1 AND role = 'teacher'",
            [username],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn handle_messages_send(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let parent_email = match required_str(req, "parentEmail") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let teacher_username = match required_str(req, "teacherUsername") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let content = match required_str(req, "content") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // The sender must be a registered parent; their profile fills the
    // denormalized sender columns.
    let sender = conn
        .query_row(
            "SELECT name, child_name FROM parents WHERE email = ?1",
            [&parent_email],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional();
    let (sender_name, child_name) = match sender {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_authorized", "unknown parent account", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match teacher_exists(conn, &teacher_username) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "selected teacher does not exist", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let message_id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO messages(id, sender_email, sender_name, child_name, teacher_username,
                              subject, content, type, status, timestamp, timestamp_unix)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'parent-to-teacher', 'unread', ?8, ?9)",
        (
            &message_id,
            &parent_email,
            &sender_name,
            &child_name,
            &teacher_username,
            &subject,
            &content,
            db::now_datetime(),
            db::now_unix(),
        ),
    );
    match inserted {
        Ok(_) => ok(&req.id, json!({ "messageId": message_id })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_messages_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let parent_email = match required_str(req, "parentEmail") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(&format!(
        "SELECT {} FROM messages WHERE sender_email = ?1 ORDER BY timestamp_unix DESC, rowid DESC",
        MESSAGE_COLUMNS
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt.query_map([&parent_email], |row| message_row_json(row));
    let messages: Vec<Value> = match rows.and_then(|rows| rows.collect()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "messages": messages }))
}

fn handle_messages_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let admin_username = match required_str(req, "adminUsername") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = auth::require_staff(conn, &admin_username) {
        return auth_err(&req.id, &e);
    }

    let teacher_filter = optional_str(req, "teacherUsername");
    let result: rusqlite::Result<Vec<Value>> = match &teacher_filter {
        Some(teacher) => {
            let mut stmt = match conn.prepare(&format!(
                "SELECT {} FROM messages WHERE teacher_username = ?1
                 ORDER BY timestamp_unix DESC, rowid DESC",
                MESSAGE_COLUMNS
            )) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            stmt.query_map([teacher], |row| message_row_json(row))
                .and_then(|rows| rows.collect())
        }
        None => {
            let mut stmt = match conn.prepare(&format!(
                "SELECT {} FROM messages ORDER BY timestamp_unix DESC, rowid DESC",
                MESSAGE_COLUMNS
            )) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            stmt.query_map([], |row| message_row_json(row))
                .and_then(|rows| rows.collect())
        }
    };

    match result {
        Ok(messages) => ok(&req.id, json!({ "messages": messages })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "messages.send" => Some(handle_messages_send(state, req)),
        "messages.history" => Some(handle_messages_history(state, req)),
        "messages.list" => Some(handle_messages_list(state, req)),
        _ => None,
    }
}
