use crate::ipc::error::{bad_params, err};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use std::collections::HashSet;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| bad_params(&req.id, format!("missing {}", key)))
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn db_err(req: &Request, code: &str, e: anyhow::Error) -> serde_json::Value {
    tracing::warn!(method = %req.method, code, error = %format!("{e:#}"), "request failed");
    err(&req.id, code, format!("{e:#}"), None)
}

/// Trimmed, de-duplicated subject names in the order given.
pub fn parse_subject_list(v: &serde_json::Value, field: &str) -> Result<Vec<String>, String> {
    let Some(raw) = v.as_array() else {
        return Err(format!("{} must be an array of strings", field));
    };
    let mut out = Vec::with_capacity(raw.len());
    let mut seen = HashSet::new();
    for item in raw {
        let Some(s) = item.as_str() else {
            return Err(format!("{} must contain only strings", field));
        };
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(format!("{} must not contain empty names", field));
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    Ok(out)
}

pub fn optional_month(req: &Request) -> Result<Option<String>, serde_json::Value> {
    match req.params.get("month") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_str().map(str::trim) {
            Some(m) if crate::calc::is_month_key(m) => Ok(Some(m.to_string())),
            _ => Err(bad_params(&req.id, "month must be a YYYY-MM string")),
        },
    }
}
