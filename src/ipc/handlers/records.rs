use crate::calc::{self, Mark};
use crate::db::{self, NewTest, TestPatch};
use crate::ipc::error::{bad_params, not_found, ok};
use crate::ipc::helpers::{db_conn, db_err, optional_month, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;

const MAX_WEEK_OF_MONTH: i64 = 5;

fn parse_date(v: Option<&serde_json::Value>) -> Result<String, String> {
    let Some(s) = v.and_then(|v| v.as_str()).map(str::trim) else {
        return Err("date must be a string".to_string());
    };
    // Stored as YYYY-MM-DD so the date column sorts chronologically.
    match calc::parse_record_date(s) {
        Some(d) => Ok(d.format("%Y-%m-%d").to_string()),
        None => Err(format!("unrecognised date: {}", s)),
    }
}

fn parse_week(v: Option<&serde_json::Value>) -> Result<Option<u32>, String> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_i64() {
            Some(n) if (1..=MAX_WEEK_OF_MONTH).contains(&n) => Ok(Some(n as u32)),
            _ => Err(format!(
                "week must be an integer between 1 and {}",
                MAX_WEEK_OF_MONTH
            )),
        },
    }
}

fn parse_marks(v: Option<&serde_json::Value>) -> Result<BTreeMap<String, Mark>, String> {
    let Some(obj) = v.and_then(|v| v.as_object()) else {
        return Err("marks must be an object".to_string());
    };
    let mut out = BTreeMap::new();
    for (subject, raw) in obj {
        let key = subject.trim();
        if key.is_empty() {
            return Err("marks must not contain empty subject names".to_string());
        }
        if !(raw.is_number() || raw.is_object()) {
            return Err(format!(
                "marks.{} must be a number or {{obtained, total}}",
                key
            ));
        }
        let mark: Mark = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
        out.insert(key.to_string(), mark);
    }
    Ok(out)
}

fn require_class(conn: &Connection, req: &Request, class_id: &str) -> Result<(), serde_json::Value> {
    match db::get_class(conn, class_id) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(not_found(&req.id, "class")),
        Err(e) => Err(db_err(req, "db_query_failed", e)),
    }
}

fn handle_tests_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let month = match optional_month(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_class(conn, req, &class_id) {
        return e;
    }

    let tests = match db::list_tests(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return db_err(req, "db_query_failed", e),
    };
    let tests = match month.as_deref() {
        Some(m) => calc::filter_month(&tests, m),
        None => tests,
    };
    ok(&req.id, json!({ "tests": tests }))
}

fn handle_tests_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let parsed = parse_date(req.params.get("date")).and_then(|date| {
        Ok(NewTest {
            date,
            week: parse_week(req.params.get("week"))?,
            marks: parse_marks(req.params.get("marks"))?,
        })
    });
    let test = match parsed {
        Ok(v) => v,
        Err(message) => return bad_params(&req.id, message),
    };
    if let Err(e) = require_class(conn, req, &class_id) {
        return e;
    }

    match db::insert_test(conn, &class_id, &test) {
        Ok(test_id) => {
            tracing::debug!(class_id = %class_id, test_id = %test_id, subjects = test.marks.len(), "test recorded");
            ok(&req.id, json!({ "testId": test_id }))
        }
        Err(e) => db_err(req, "db_insert_failed", e),
    }
}

fn parse_patch(v: Option<&serde_json::Value>) -> Result<TestPatch, String> {
    let Some(obj) = v.and_then(|v| v.as_object()) else {
        return Err("patch must be an object".to_string());
    };
    let mut patch = TestPatch::default();
    for (k, v) in obj {
        match k.as_str() {
            "date" => patch.date = Some(parse_date(Some(v))?),
            "week" => patch.week = Some(parse_week(Some(v))?),
            "marks" => patch.marks = Some(parse_marks(Some(v))?),
            other => return Err(format!("patch.{} is not editable", other)),
        }
    }
    Ok(patch)
}

fn handle_tests_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test_id = match required_str(req, "testId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match parse_patch(req.params.get("patch")) {
        Ok(v) => v,
        Err(message) => return bad_params(&req.id, message),
    };

    match db::update_test(conn, &class_id, &test_id, &patch) {
        Ok(true) => ok(&req.id, json!({ "ok": true })),
        Ok(false) => not_found(&req.id, "test"),
        Err(e) => db_err(req, "db_update_failed", e),
    }
}

fn handle_tests_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test_id = match required_str(req, "testId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::delete_test(conn, &class_id, &test_id) {
        Ok(true) => ok(&req.id, json!({ "ok": true })),
        Ok(false) => not_found(&req.id, "test"),
        Err(e) => db_err(req, "db_delete_failed", e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tests.list" => Some(handle_tests_list(state, req)),
        "tests.create" => Some(handle_tests_create(state, req)),
        "tests.update" => Some(handle_tests_update(state, req)),
        "tests.delete" => Some(handle_tests_delete(state, req)),
        _ => None,
    }
}
