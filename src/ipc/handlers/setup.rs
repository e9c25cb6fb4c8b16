use crate::db;
use crate::ipc::error::{bad_params, err, ok};
use crate::ipc::helpers::{db_conn, db_err, parse_subject_list};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Analysis,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "analysis" => Some(Self::Analysis),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Analysis => "setup.analysis",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Analysis => json!({
            "trendStableBand": 0.0,
            "defaultSubjects": ["English", "Hindi", "Maths", "Science", "Social Science"]
        }),
    }
}

fn validate_field(section: SetupSection, key: &str, value: &Value) -> Result<(), String> {
    match (section, key) {
        (SetupSection::Analysis, "trendStableBand") => match value.as_f64() {
            Some(v) if v.is_finite() && v >= 0.0 => Ok(()),
            _ => Err("trendStableBand must be a non-negative number".to_string()),
        },
        (SetupSection::Analysis, "defaultSubjects") => {
            parse_subject_list(value, "defaultSubjects").map(|_| ())
        }
        _ => Err(format!("unknown setting: {}", key)),
    }
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut merged = default_section(section);
    if let Some(Value::Object(stored)) = db::settings_get_json(conn, section.key())? {
        if let Some(obj) = merged.as_object_mut() {
            for (k, v) in stored {
                // Drop stored values that no longer validate.
                if validate_field(section, &k, &v).is_ok() {
                    obj.insert(k, v);
                }
            }
        }
    }
    Ok(merged)
}

/// Analysis settings the stats handlers run with.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub trend_stable_band: f64,
    pub default_subjects: Vec<String>,
}

impl AnalysisSettings {
    fn from_value(v: &Value) -> Self {
        Self {
            trend_stable_band: v
                .get("trendStableBand")
                .and_then(|x| x.as_f64())
                .unwrap_or(0.0),
            default_subjects: v
                .get("defaultSubjects")
                .and_then(|x| parse_subject_list(x, "defaultSubjects").ok())
                .unwrap_or_default(),
        }
    }
}

/// Without a workspace the built-in defaults apply.
pub fn analysis_settings(conn: Option<&Connection>) -> anyhow::Result<AnalysisSettings> {
    let value = match conn {
        Some(conn) => load_section(conn, SetupSection::Analysis)?,
        None => default_section(SetupSection::Analysis),
    };
    Ok(AnalysisSettings::from_value(&value))
}

fn parse_section(req: &Request) -> Result<SetupSection, Value> {
    let raw = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .ok_or_else(|| bad_params(&req.id, "missing section"))?;
    SetupSection::parse(raw).ok_or_else(|| bad_params(&req.id, format!("unknown section: {}", raw)))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    let section = match parse_section(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let value = match state.db.as_ref() {
        Some(conn) => match load_section(conn, section) {
            Ok(v) => v,
            Err(e) => return db_err(req, "db_query_failed", e),
        },
        None => default_section(section),
    };
    ok(
        &req.id,
        json!({ "section": req.params.get("section"), "value": value }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section = match parse_section(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return bad_params(&req.id, "patch must be an object");
    };
    for (k, v) in patch {
        if let Err(message) = validate_field(section, k, v) {
            return err(
                &req.id,
                "bad_params",
                message,
                Some(json!({ "field": k })),
            );
        }
    }

    let mut current = match load_section(conn, section) {
        Ok(Value::Object(m)) => m,
        Ok(_) => Map::new(),
        Err(e) => return db_err(req, "db_query_failed", e),
    };
    for (k, v) in patch {
        current.insert(k.clone(), v.clone());
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &Value::Object(current)) {
        return db_err(req, "db_update_failed", e);
    }
    tracing::info!(section = section.key(), "settings updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
