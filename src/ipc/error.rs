use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Caller-facing status class for an error code, so the host can pick an
/// HTTP status without knowing every code.
pub fn status_for(code: &str) -> &'static str {
    match code {
        "not_found" => "not_found",
        "forbidden" => "forbidden",
        "unauthorized" => "unauthorized",
        "duplicate" | "in_use" | "conflict" => "conflict",
        "bad_params" | "bad_json" | "invalid_route" | "out_of_order" | "no_workspace" => {
            "bad_request"
        }
        _ => "server_error",
    }
}
