use crate::db;
use crate::ipc::error::{bad_params, not_found, ok};
use crate::ipc::handlers::setup::analysis_settings;
use crate::ipc::helpers::{db_conn, db_err, parse_subject_list, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };
    match db::list_classes(conn) {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => db_err(req, "db_query_failed", e),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return bad_params(&req.id, "missing name"),
    };
    if name.is_empty() {
        return bad_params(&req.id, "name must not be empty");
    }

    let subjects = match req.param("subjects") {
        Some(v) => match parse_subject_list(v, "subjects") {
            Ok(s) => s,
            Err(message) => return bad_params(&req.id, message),
        },
        None => match analysis_settings(Some(conn)) {
            Ok(s) => s.default_subjects,
            Err(e) => return db_err(req, "db_query_failed", e),
        },
    };

    match db::insert_class(conn, &name, &subjects) {
        Ok(class_id) => {
            tracing::info!(class_id = %class_id, subjects = subjects.len(), "class created");
            ok(
                &req.id,
                json!({ "classId": class_id, "name": name, "subjects": subjects }),
            )
        }
        Err(e) => db_err(req, "db_insert_failed", e),
    }
}

fn handle_classes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::get_class(conn, &class_id) {
        Ok(Some(class)) => ok(&req.id, json!({ "class": class })),
        Ok(None) => not_found(&req.id, "class"),
        Err(e) => db_err(req, "db_query_failed", e),
    }
}

fn handle_classes_update_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("subjects") else {
        return bad_params(&req.id, "subjects array required");
    };
    let subjects = match parse_subject_list(raw, "subjects") {
        Ok(s) => s,
        Err(message) => return bad_params(&req.id, message),
    };

    match db::update_class_subjects(conn, &class_id, &subjects) {
        Ok(true) => ok(&req.id, json!({ "classId": class_id, "subjects": subjects })),
        Ok(false) => not_found(&req.id, "class"),
        Err(e) => db_err(req, "db_update_failed", e),
    }
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::delete_class(conn, &class_id) {
        Ok(true) => {
            tracing::info!(class_id = %class_id, "class deleted");
            ok(&req.id, json!({ "ok": true }))
        }
        Ok(false) => not_found(&req.id, "class"),
        Err(e) => db_err(req, "db_delete_failed", e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.get" => Some(handle_classes_get(state, req)),
        "classes.updateSubjects" => Some(handle_classes_update_subjects(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
