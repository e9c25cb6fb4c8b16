mod test_support;

use serde_json::json;
use test_support::{request, request_err, request_ok, spawn_sidecar};

#[test]
fn inline_records_need_no_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "stats.compute",
        json!({
            "tests": [
                { "id": "a", "date": "2024-01-10", "marks": { "Maths": 42 } },
                { "id": "b", "date": "2024-01-11", "marks": { "Maths": { "obtained": 42, "total": 100 } } },
                { "id": "c", "date": "2024-01-12", "marks": { "Maths": { "obtained": 5, "total": 0 } } }
            ]
        }),
    );
    let stats = &res["stats"];
    assert_eq!(stats["weekly"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(stats["weekly"][0]["periodKey"], "2024-01-08");
    assert_eq!(stats["overall"]["perSubject"]["Maths"], 42.0);
    assert_eq!(stats["overall"]["overall"], 42.0);
}

#[test]
fn empty_input_is_null_not_zero() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "stats.compute",
        json!({ "tests": [] }),
    );
    assert!(res["stats"].is_null());

    let cum = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "stats.cumulative",
        json!({ "tests": [] }),
    );
    assert!(cum["month"].is_null());
    assert_eq!(cum["weeks"], json!([]));

    let consistency = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "stats.consistency",
        json!({ "tests": [] }),
    );
    assert_eq!(consistency["subjects"], json!([]));
}

#[test]
fn unparseable_dates_are_reported_as_skipped() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "stats.compute",
        json!({
            "tests": [
                { "id": "ok", "date": "2024-06-03", "week": "2", "marks": { "Science": 70 } },
                { "id": "broken", "date": "03/06/2024", "marks": { "Science": 10 } }
            ]
        }),
    );
    let stats = &res["stats"];
    assert_eq!(stats["weekly"][0]["periodKey"], "2024-06-w2");
    assert_eq!(stats["overall"]["overall"], 70.0);
    assert_eq!(
        stats["skipped"],
        json!([{ "index": 1, "id": "broken", "reason": { "kind": "invalidDate", "date": "03/06/2024" } }])
    );

    let records = json!([
        { "id": "jan", "date": "2024-01-08", "marks": { "Science": 60 } },
        { "id": "garbled", "date": "??", "marks": { "Science": 5 } },
        { "id": "feb", "date": "2024-02-05", "marks": { "Science": 90 } }
    ]);
    let expected_skip = json!([{ "index": 1, "id": "garbled", "reason": { "kind": "invalidDate", "date": "??" } }]);

    let jan = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "stats.compute",
        json!({ "tests": records.clone(), "month": "2024-01" }),
    );
    assert_eq!(jan["stats"]["overall"]["overall"], 60.0);
    assert_eq!(jan["stats"]["skipped"], expected_skip);

    let cum = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "stats.cumulative",
        json!({ "tests": records }),
    );
    assert_eq!(cum["month"], "2024-02");
    assert_eq!(cum["weeks"].as_array().map(|w| w.len()), Some(1));
    assert_eq!(cum["skipped"], expected_skip);
}

#[test]
fn inline_progress_uses_subjects_found_in_records() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let tests = json!([
        { "date": "2024-01-01", "marks": { "Physics": 50 } },
        { "date": "2024-01-02", "marks": { "Physics": 60, "Art": 90 } },
        { "date": "2024-01-03", "marks": { "Physics": 70 } },
        { "date": "2024-01-04", "marks": { "Physics": 80 } }
    ]);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "stats.subjectProgress",
        json!({ "tests": tests }),
    );
    let rows = res["subjects"].as_array().expect("subjects");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["subject"], "Physics");
    assert_eq!(rows[0]["progressRate"], 10.0);
    assert_eq!(rows[1]["subject"], "Art");
    assert!(rows[1]["progressRate"].is_null());

    let explicit = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "stats.subjectProgress",
        json!({ "tests": tests, "subjects": ["Chemistry"] }),
    );
    assert_eq!(explicit["subjects"][0]["subject"], "Chemistry");
    assert_eq!(explicit["subjects"][0]["totalTests"], 0);
}

#[test]
fn bad_sources_are_rejected() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    assert_eq!(
        request_err(&mut stdin, &mut reader, "1", "stats.compute", json!({})),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "2",
            "stats.compute",
            json!({ "tests": [{ "marks": {} }] }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "3",
            "stats.cumulative",
            json!({ "tests": [], "month": "January" }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "4",
            "stats.consistency",
            json!({ "tests": null }),
        ),
        "bad_params"
    );
    let v = request(
        &mut stdin,
        &mut reader,
        "5",
        "stats.subjectProgress",
        json!({ "tests": [], "subjects": "Maths" }),
    );
    assert_eq!(v["error"]["code"], "bad_params");
}
