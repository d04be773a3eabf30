#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_transportd");
    let mut child = Command::new(exe)
        .env_remove("TRANSPORTD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn transportd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn admin() -> Value {
    json!({ "role": "admin", "id": "admin-1" })
}

pub fn driver(id: &str) -> Value {
    json!({ "role": "driver", "id": id })
}

pub fn send_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    line: &str,
) -> Value {
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");

    let mut out = String::new();
    reader.read_line(&mut out).expect("read response line");
    assert!(!out.trim().is_empty(), "empty response for {}", line);
    serde_json::from_str(out.trim()).expect("parse response json")
}

/// Sends one request; `principal` of `Value::Null` omits the field.
pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    principal: Value,
) -> Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if !principal.is_null() {
        payload["principal"] = principal;
    }
    let value = send_raw(stdin, reader, &payload.to_string());
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    principal: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params, principal);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

/// Expects a failure and returns `(code, status)` from the error envelope.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    principal: Value,
) -> (String, String) {
    let value = request(stdin, reader, id, method, params, principal);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    let error = value.get("error").expect("error object");
    let code = error
        .get("code")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let status = error
        .get("details")
        .and_then(|d| d.get("status"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    (code, status)
}

pub fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
) -> PathBuf {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        Value::Null,
    );
    workspace
}

pub fn str_at<'a>(v: &'a Value, path: &[&str]) -> &'a str {
    let mut cur = v;
    for key in path {
        cur = cur.get(*key).unwrap_or_else(|| panic!("missing {} in {}", key, v));
    }
    cur.as_str().unwrap_or_else(|| panic!("{:?} is not a string", path))
}

pub fn stop_statuses(history: &Value) -> Vec<String> {
    history
        .get("stops")
        .and_then(|v| v.as_array())
        .expect("stops")
        .iter()
        .map(|s| s.get("reached").and_then(|v| v.as_str()).unwrap_or("").to_string())
        .collect()
}

pub fn driver_params(name: &str) -> Value {
    json!({
        "licenseNumber": format!("LIC-{}", name),
        "experience": 7,
        "dateOfBirth": "1985-04-12",
        "licenseExpiryDate": "2030-01-31",
        "name": name,
        "email": format!("{}@school.test", name.to_ascii_lowercase()),
        "phoneNo": "9876543210",
        "salary": 32000.0,
        "address": "12 Depot Road",
        "govId": format!("GOV-{}", name)
    })
}

/// Three-stop route `A -> B -> C` attached to a fresh vehicle.
pub fn vehicle_with_route(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    registration: &str,
    driver_ids: &[&str],
) -> (String, String) {
    let vehicle = request_ok(
        stdin,
        reader,
        "v",
        "vehicles.create",
        json!({ "registrationNumber": registration, "type": "Bus", "driverIds": driver_ids }),
        admin(),
    );
    let vehicle_id = str_at(&vehicle, &["vehicle", "id"]).to_string();
    let route = request_ok(
        stdin,
        reader,
        "r",
        "routes.create",
        json!({
            "name": format!("Route {}", registration),
            "vehicleId": vehicle_id,
            "stops": [
                { "stop": "A", "lat": 26.85, "lng": 75.70, "sequence": 1 },
                { "stop": "B", "lat": 26.88, "lng": 75.74, "sequence": 2 },
                { "stop": "C", "lat": 26.91, "lng": 75.78, "sequence": 3 }
            ]
        }),
        admin(),
    );
    let route_id = str_at(&route, &["route", "id"]).to_string();
    (vehicle_id, route_id)
}
