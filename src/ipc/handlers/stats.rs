use crate::calc::{self, TestRecord};
use crate::db;
use crate::ipc::error::{bad_params, not_found, ok};
use crate::ipc::handlers::setup::{analysis_settings, AnalysisSettings};
use crate::ipc::helpers::{db_conn, db_err, optional_month, parse_subject_list};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Records a stats request runs over: a stored class, or an inline `tests` array.
struct Source {
    tests: Vec<TestRecord>,
    class_subjects: Option<Vec<String>>,
}

fn load_source(state: &AppState, req: &Request) -> Result<Source, serde_json::Value> {
    if let Some(raw) = req.param("tests") {
        let tests: Vec<TestRecord> = serde_json::from_value(raw.clone()).map_err(|e| {
            bad_params(&req.id, format!("tests must be an array of test records: {}", e))
        })?;
        return Ok(Source {
            tests,
            class_subjects: None,
        });
    }

    let Some(class_id) = req.params.get("classId").and_then(|v| v.as_str()) else {
        return Err(bad_params(&req.id, "missing classId or tests"));
    };
    let conn = db_conn(state, req)?;
    let class = match db::get_class(conn, class_id) {
        Ok(Some(c)) => c,
        Ok(None) => return Err(not_found(&req.id, "class")),
        Err(e) => return Err(db_err(req, "db_query_failed", e)),
    };
    let tests = db::list_tests(conn, class_id).map_err(|e| db_err(req, "db_query_failed", e))?;
    Ok(Source {
        tests,
        class_subjects: Some(class.subjects),
    })
}

fn load_settings(state: &AppState, req: &Request) -> Result<AnalysisSettings, serde_json::Value> {
    analysis_settings(state.db.as_ref()).map_err(|e| db_err(req, "db_query_failed", e))
}

fn handle_stats_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let month = match optional_month(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let source = match load_source(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let report = match month.as_deref() {
        Some(m) => calc::compute_stats_for_month(&source.tests, m),
        None => calc::compute_stats(&source.tests),
    };
    if let Some(r) = report.as_ref().filter(|r| !r.skipped.is_empty()) {
        tracing::warn!(skipped = r.skipped.len(), "records with unreadable dates left out of stats");
    }
    ok(&req.id, json!({ "month": month, "stats": report }))
}

fn handle_stats_cumulative(state: &mut AppState, req: &Request) -> serde_json::Value {
    let month = match optional_month(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let source = match load_source(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(month) = month.or_else(|| calc::latest_month(&source.tests)) else {
        return ok(
            &req.id,
            json!({ "month": null, "weeks": [], "skipped": unreadable_dates(&source.tests) }),
        );
    };

    let (weekly, skipped) = calc::compute_stats_for_month(&source.tests, &month)
        .map(|r| (r.weekly, r.skipped))
        .unwrap_or_default();
    let weeks: Vec<serde_json::Value> = calc::cumulative_weekly(&weekly)
        .into_iter()
        .map(|p| {
            json!({
                "periodKey": p.period_key,
                "label": calc::week_label(&p.period_key),
                "stats": p.stats,
            })
        })
        .collect();
    ok(
        &req.id,
        json!({ "month": month, "weeks": weeks, "skipped": skipped }),
    )
}

/// Skip list for input that has no readable month at all.
fn unreadable_dates(tests: &[TestRecord]) -> Vec<calc::SkippedRecord> {
    calc::compute_stats(tests)
        .map(|r| r.skipped)
        .unwrap_or_default()
}

fn handle_stats_subject_progress(state: &mut AppState, req: &Request) -> serde_json::Value {
    let requested = match req.param("subjects") {
        Some(v) => match parse_subject_list(v, "subjects") {
            Ok(s) => Some(s),
            Err(message) => return bad_params(&req.id, message),
        },
        None => None,
    };
    let source = match load_source(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match load_settings(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Explicit list, then the class's own list, then whatever the records contain.
    let subjects = requested
        .or(source.class_subjects.filter(|s| !s.is_empty()))
        .unwrap_or_else(|| {
            calc::scores_by_subject(&source.tests)
                .into_iter()
                .map(|(s, _)| s)
                .collect()
        });
    let rows = calc::subject_progress(&source.tests, &subjects, settings.trend_stable_band);
    ok(&req.id, json!({ "subjects": rows }))
}

fn handle_stats_consistency(state: &mut AppState, req: &Request) -> serde_json::Value {
    let source = match load_source(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!({ "subjects": calc::consistency(&source.tests) }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.compute" => Some(handle_stats_compute(state, req)),
        "stats.cumulative" => Some(handle_stats_cumulative(state, req)),
        "stats.subjectProgress" => Some(handle_stats_subject_progress(state, req)),
        "stats.consistency" => Some(handle_stats_consistency(state, req)),
        _ => None,
    }
}
