use crate::calc::{parse_record_date, Mark, TestRecord};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE: &str = "scorebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            subjects_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tests(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            date TEXT NOT NULL,
            marks_json TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    // Week-of-month tags arrived after the first schema.
    ensure_tests_week(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tests_class_date ON tests(class_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_tests_week(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "tests", "week")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE tests ADD COLUMN week INTEGER", [])?;
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

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("corrupt setting {}", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub id: String,
    pub name: String,
    pub subjects: Vec<String>,
    pub test_count: i64,
}

fn parse_subjects(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "unreadable subjects_json, treating as empty");
            Vec::new()
        }
    }
}

const CLASS_SELECT: &str = "SELECT
       c.id,
       c.name,
       c.subjects_json,
       (SELECT COUNT(*) FROM tests t WHERE t.class_id = c.id) AS test_count
     FROM classes c";

fn class_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ClassRow> {
    let subjects_json: String = r.get(2)?;
    Ok(ClassRow {
        id: r.get(0)?,
        name: r.get(1)?,
        subjects: parse_subjects(&subjects_json),
        test_count: r.get(3)?,
    })
}

pub fn list_classes(conn: &Connection) -> anyhow::Result<Vec<ClassRow>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY c.name", CLASS_SELECT))?;
    let rows = stmt
        .query_map([], class_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_class(conn: &Connection, class_id: &str) -> anyhow::Result<Option<ClassRow>> {
    Ok(conn
        .query_row(
            &format!("{} WHERE c.id = ?", CLASS_SELECT),
            [class_id],
            class_from_row,
        )
        .optional()?)
}

pub fn insert_class(conn: &Connection, name: &str, subjects: &[String]) -> anyhow::Result<String> {
    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, subjects_json, created_at) VALUES(?, ?, ?, ?)",
        (&class_id, name, serde_json::to_string(subjects)?, now_stamp()),
    )?;
    Ok(class_id)
}

/// Returns false when the class does not exist.
pub fn update_class_subjects(conn: &Connection, class_id: &str, subjects: &[String]) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE classes SET subjects_json = ? WHERE id = ?",
        (serde_json::to_string(subjects)?, class_id),
    )?;
    Ok(changed > 0)
}

pub fn delete_class(conn: &Connection, class_id: &str) -> anyhow::Result<bool> {
    let tx = conn.unchecked_transaction()?;
    // No ON DELETE CASCADE; children first.
    tx.execute("DELETE FROM tests WHERE class_id = ?", [class_id])?;
    let removed = tx.execute("DELETE FROM classes WHERE id = ?", [class_id])?;
    tx.commit()?;
    Ok(removed > 0)
}

fn parse_marks(test_id: &str, raw: &str) -> BTreeMap<String, Mark> {
    match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(test_id, error = %e, "unreadable marks_json, treating as empty");
            BTreeMap::new()
        }
    }
}

/// Test records of a class in chronological order.
pub fn list_tests(conn: &Connection, class_id: &str) -> anyhow::Result<Vec<TestRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, date, week, marks_json
         FROM tests
         WHERE class_id = ?
         ORDER BY date, created_at, rowid",
    )?;
    let mut rows = stmt
        .query_map([class_id], |r| {
            let id: String = r.get(0)?;
            let week: Option<i64> = r.get(2)?;
            let marks_json: String = r.get(3)?;
            Ok(TestRecord {
                marks: parse_marks(&id, &marks_json),
                id: Some(id),
                date: r.get(1)?,
                week: week.and_then(|w| u32::try_from(w).ok()).filter(|w| *w > 0),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    // Rows written before dates were normalized may not sort as text.
    rows.sort_by_key(|t| parse_record_date(&t.date));
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct NewTest {
    pub date: String,
    pub week: Option<u32>,
    pub marks: BTreeMap<String, Mark>,
}

pub fn insert_test(conn: &Connection, class_id: &str, test: &NewTest) -> anyhow::Result<String> {
    let test_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO tests(id, class_id, date, week, marks_json, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &test_id,
            class_id,
            &test.date,
            test.week,
            serde_json::to_string(&test.marks)?,
            now_stamp(),
        ),
    )?;
    Ok(test_id)
}

#[derive(Debug, Clone, Default)]
pub struct TestPatch {
    pub date: Option<String>,
    /// `Some(None)` clears the tag.
    pub week: Option<Option<u32>>,
    pub marks: Option<BTreeMap<String, Mark>>,
}

pub fn update_test(
    conn: &Connection,
    class_id: &str,
    test_id: &str,
    patch: &TestPatch,
) -> anyhow::Result<bool> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM tests WHERE id = ? AND class_id = ?",
            (test_id, class_id),
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Ok(false);
    }

    let tx = conn.unchecked_transaction()?;
    if let Some(date) = &patch.date {
        tx.execute("UPDATE tests SET date = ? WHERE id = ?", (date, test_id))?;
    }
    if let Some(week) = patch.week {
        tx.execute("UPDATE tests SET week = ? WHERE id = ?", (week, test_id))?;
    }
    if let Some(marks) = &patch.marks {
        tx.execute(
            "UPDATE tests SET marks_json = ? WHERE id = ?",
            (serde_json::to_string(marks)?, test_id),
        )?;
    }
    tx.commit()?;
    Ok(true)
}

pub fn delete_test(conn: &Connection, class_id: &str, test_id: &str) -> anyhow::Result<bool> {
    let removed = conn.execute(
        "DELETE FROM tests WHERE id = ? AND class_id = ?",
        (test_id, class_id),
    )?;
    Ok(removed > 0)
}
