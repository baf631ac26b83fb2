use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::model::now_timestamp;

pub const DB_FILE_NAME: &str = "rollcall.sqlite3";

pub const BOOTSTRAP_ADMIN_EMAIL: &str = "admin@attendance.com";
const BOOTSTRAP_ADMIN_NAME: &str = "System Administrator";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)?;
    init_schema(&conn)?;
    info!(path = %db_path.display(), "workspace database opened");
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            email TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users(email COLLATE NOCASE)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            description TEXT,
            credit_hours INTEGER NOT NULL DEFAULT 0,
            teacher_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    // Workspaces created before course descriptions existed lack the column.
    ensure_courses_description(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_teacher ON courses(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(student_id, course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            remarks TEXT,
            marked_by TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(marked_by) REFERENCES users(id),
            UNIQUE(course_id, student_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_course_date ON attendance_records(course_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

/// Creates the bootstrap admin when the workspace has no admin yet.
/// Returns the new admin's id when one was created.
pub fn seed_bootstrap_admin(conn: &Connection) -> anyhow::Result<Option<String>> {
    let existing: Option<String> = conn
        .query_row("SELECT id FROM users WHERE role = 'admin' LIMIT 1", [], |r| {
            r.get(0)
        })
        .optional()?;
    if existing.is_some() {
        return Ok(None);
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, full_name, email, role, created_at)
         VALUES(?, ?, ?, 'admin', ?)",
        (&id, BOOTSTRAP_ADMIN_NAME, BOOTSTRAP_ADMIN_EMAIL, now_timestamp()),
    )?;
    info!(email = BOOTSTRAP_ADMIN_EMAIL, "seeded bootstrap admin");
    Ok(Some(id))
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn ensure_courses_description(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "courses", "description")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE courses ADD COLUMN description TEXT", [])?;
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

#[cfg(test)]
pub fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_schema(&conn).expect("init schema");
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_schema_is_idempotent_and_seeds_one_admin() {
        let conn = test_conn();
        init_schema(&conn).expect("second init");

        let first = seed_bootstrap_admin(&conn).expect("seed");
        assert!(first.is_some());
        let second = seed_bootstrap_admin(&conn).expect("seed again");
        assert!(second.is_none());

        let admins: i64 = conn
            .query_row("SELECT COUNT(*) FROM users WHERE role = 'admin'", [], |r| {
                r.get(0)
            })
            .expect("count admins");
        assert_eq!(admins, 1);
    }

    #[test]
    fn older_courses_table_gains_description_column() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE courses(
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                code TEXT NOT NULL,
                credit_hours INTEGER NOT NULL DEFAULT 0,
                teacher_id TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )
        .expect("create legacy courses");
        assert!(!table_has_column(&conn, "courses", "description").expect("column check"));
        init_schema(&conn).expect("init");
        assert!(table_has_column(&conn, "courses", "description").expect("column check"));
    }

    #[test]
    fn workspace_file_uses_a_rollback_journal() {
        // Backups copy the db file alone, so no WAL sidecar may hold writes.
        let dir = std::env::temp_dir().join(format!("rollcalld-db-{}", Uuid::new_v4()));
        let conn = open_db(&dir).expect("open workspace");
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |r| r.get(0))
            .expect("journal mode");
        assert_eq!(mode.to_ascii_lowercase(), "delete");
        drop(conn);
        assert!(!dir.join(format!("{DB_FILE_NAME}-wal")).exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn settings_roundtrip_overwrites_existing_key() {
        let conn = test_conn();
        assert!(settings_get_json(&conn, "k").expect("get").is_none());
        settings_set_json(&conn, "k", &serde_json::json!({ "a": 1 })).expect("set");
        settings_set_json(&conn, "k", &serde_json::json!({ "a": 2 })).expect("set");
        let v = settings_get_json(&conn, "k").expect("get").expect("present");
        assert_eq!(v["a"], 2);
    }
}
