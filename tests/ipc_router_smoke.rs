mod test_support;

use serde_json::{json, Value};
use test_support::{
    admin, request, request_err, request_ok, select_workspace, send_raw, spawn_sidecar,
};

#[test]
fn requests_before_workspace_select_report_no_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}), Value::Null);
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map_or(false, |v| v.is_null()));

    let (code, status) = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "vehicles.list",
        json!({}),
        admin(),
    );
    assert_eq!(code, "no_workspace");
    assert_eq!(status, "bad_request");
}

#[test]
fn malformed_lines_and_unknown_methods_get_error_replies() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let resp = send_raw(&mut stdin, &mut reader, "{not json");
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_json")
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "vehicles.teleport",
        json!({}),
        admin(),
    );
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    // The sidecar keeps serving after both failures.
    let _ = request_ok(&mut stdin, &mut reader, "3", "health", json!({}), Value::Null);
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = select_workspace(&mut stdin, &mut reader, "transportd-router-smoke");
    assert!(workspace.join("transport.sqlite3").is_file());

    let methods = [
        ("setup.get", json!({})),
        ("vehicles.list", json!({})),
        ("drivers.list", json!({})),
        ("routes.list", json!({})),
        ("tracking.list", json!({})),
    ];
    for (i, (method, params)) in methods.into_iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("m{}", i),
            method,
            params,
            admin(),
        );
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} -> {}",
            method,
            resp
        );
    }

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "g1",
        "tracking.get",
        json!({ "historyId": "missing" }),
        admin(),
    );
    assert_eq!(code, "not_found");
}
