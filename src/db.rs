use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;

use crate::auth;

pub const DB_FILE: &str = "tracker.sqlite3";

/// `YYYY-MM-DD HH:MM:SS`, the datetime format the portal has always stored.
pub fn now_datetime() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    init_schema(&conn)?;
    seed_default_accounts(&conn)?;

    Ok(conn)
}

/// Creates all tables and indexes idempotently, then applies additive
/// migrations for workspaces created by older builds.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade TEXT NOT NULL,
            section TEXT NOT NULL,
            child_code TEXT NOT NULL UNIQUE,
            subjects TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            created_by TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_created ON students(created_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parents(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT NOT NULL,
            child_name TEXT NOT NULL,
            child_grade TEXT NOT NULL,
            relationship TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            signup_code TEXT NOT NULL UNIQUE,
            signup_code_used INTEGER NOT NULL DEFAULT 0,
            linked_children TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            sender_email TEXT NOT NULL,
            sender_name TEXT NOT NULL,
            child_name TEXT NOT NULL,
            teacher_username TEXT,
            subject TEXT NOT NULL,
            content TEXT NOT NULL,
            type TEXT NOT NULL,
            status TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            timestamp_unix INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_email)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_teacher ON messages(teacher_username)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_unix ON messages(timestamp_unix)",
        [],
    )?;

    // Workspaces created before teacher-directed messaging lack the column.
    ensure_messages_teacher_username(conn)?;

    Ok(())
}

/// First open of an empty workspace provisions the default admin plus five
/// teacher accounts, matching the original deployment seed.
pub fn seed_default_accounts(conn: &Connection) -> anyhow::Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM admins", [], |row| row.get(0))?;
    if count > 0 {
        return Ok(());
    }

    let now = now_datetime();
    let mut insert = conn.prepare(
        "INSERT INTO admins(id, username, password_hash, role, name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    let admin_hash = auth::hash_password("admin123")?;
    insert.execute((
        uuid::Uuid::new_v4().to_string(),
        "admin",
        admin_hash,
        "admin",
        "System Administrator",
        &now,
    ))?;

    for n in 1..=5 {
        let hash = auth::hash_password("teacher123")?;
        insert.execute((
            uuid::Uuid::new_v4().to_string(),
            format!("teacher{}", n),
            hash,
            "teacher",
            format!("Teacher {}", n),
            &now,
        ))?;
    }

    Ok(())
}

fn ensure_messages_teacher_username(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "messages", "teacher_username")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE messages ADD COLUMN teacher_username TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
