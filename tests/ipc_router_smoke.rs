mod test_support;

use serde_json::json;
use test_support::{request, send_raw, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("scorebook-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health.get("ok").and_then(|v| v.as_bool()), Some(true));
    assert!(health["result"]["workspacePath"].is_null());

    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "Smoke Class" }),
    );
    let class_id = created
        .get("result")
        .and_then(|v| v.get("classId"))
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let calls = vec![
        ("4", "classes.list", json!({})),
        ("5", "classes.get", json!({ "classId": class_id })),
        (
            "6",
            "classes.updateSubjects",
            json!({ "classId": class_id, "subjects": ["Maths"] }),
        ),
        (
            "7",
            "tests.create",
            json!({ "classId": class_id, "date": "2024-01-08", "marks": { "Maths": 70 } }),
        ),
        ("8", "tests.list", json!({ "classId": class_id })),
        ("9", "stats.compute", json!({ "classId": class_id })),
        ("10", "stats.cumulative", json!({ "classId": class_id })),
        ("11", "stats.subjectProgress", json!({ "classId": class_id })),
        ("12", "stats.consistency", json!({ "classId": class_id })),
        ("13", "setup.get", json!({ "section": "analysis" })),
        (
            "14",
            "setup.update",
            json!({ "section": "analysis", "patch": { "trendStableBand": 0.5 } }),
        ),
        ("15", "classes.delete", json!({ "classId": class_id })),
    ];
    for (id, method, params) in calls {
        let value = request(&mut stdin, &mut reader, id, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
    }

    let unknown = request(&mut stdin, &mut reader, "16", "nope.method", json!({}));
    assert_eq!(
        unknown["error"]["code"].as_str(),
        Some("not_implemented"),
        "unexpected: {}",
        unknown
    );

    let bad = send_raw(&mut stdin, &mut reader, "{not json");
    assert_eq!(bad["ok"].as_bool(), Some(false));
    assert_eq!(bad["error"]["code"].as_str(), Some("bad_json"));

    // The sidecar keeps serving after a bad line.
    let again = request(&mut stdin, &mut reader, "17", "health", json!({}));
    assert_eq!(
        again["result"]["workspacePath"].as_str(),
        Some(&*workspace.to_string_lossy())
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn workspace_bound_methods_require_a_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    for (id, method, params) in [
        ("1", "classes.create", json!({ "name": "X" })),
        ("2", "tests.list", json!({ "classId": "c" })),
        ("3", "stats.compute", json!({ "classId": "c" })),
        ("4", "setup.update", json!({ "section": "analysis", "patch": {} })),
    ] {
        let value = request(&mut stdin, &mut reader, id, method, params);
        assert_eq!(
            value["error"]["code"].as_str(),
            Some("no_workspace"),
            "{}: {}",
            method,
            value
        );
    }

    let listed = request(&mut stdin, &mut reader, "5", "classes.list", json!({}));
    assert_eq!(listed["result"]["classes"], json!([]));
}
