use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};

use crate::ipc::error::{err, ok, status_for};
use crate::ipc::types::{AppState, Request};
use crate::tracking::{Principal, TrackerError};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        let mut details = self.details.unwrap_or_else(|| json!({}));
        if let Some(obj) = details.as_object_mut() {
            obj.entry("status")
                .or_insert_with(|| Value::from(status_for(self.code)));
        }
        err(id, self.code, self.message, Some(details))
    }
}

impl From<TrackerError> for HandlerErr {
    fn from(e: TrackerError) -> Self {
        if let TrackerError::Persistence(_) = e {
            tracing::error!(error = %e, "tracker storage failure");
        }
        Self {
            code: e.code(),
            message: e.to_string(),
            details: Some(json!({ "status": e.status() })),
        }
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        tracing::error!(error = %e, "query failed");
        Self::db("db_query_failed", e)
    }
}

/// Runs `f` against the open workspace database and wraps the outcome in the
/// response envelope.
pub fn with_db(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &Request) -> Result<Value, HandlerErr>,
) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return HandlerErr::new("no_workspace", "select a workspace first").response(&req.id);
    };
    match f(conn, req) {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            tracing::warn!(code = e.code, message = %e.message, "request failed");
            e.response(&req.id)
        }
    }
}

pub fn require_principal(req: &Request) -> Result<&Principal, HandlerErr> {
    req.principal
        .as_ref()
        .ok_or_else(|| HandlerErr::new("unauthorized", "missing principal"))
}

pub fn require_admin(req: &Request) -> Result<&Principal, HandlerErr> {
    let p = require_principal(req)?;
    if !p.is_admin() {
        return Err(HandlerErr::new("forbidden", "admin role required")
            .with_details(json!({ "role": p.role() })));
    }
    Ok(p)
}

pub fn required_str(v: Option<&Value>, key: &str) -> Result<String, HandlerErr> {
    let s = v
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s.to_string())
}

/// Absent, `null` and blank strings all read as `None`.
pub fn optional_str(v: Option<&Value>, key: &str) -> Result<Option<String>, HandlerErr> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be string or null", key))),
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    required_str(params.get(key), key)
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    optional_str(params.get(key), key)
}

pub fn parse_date(raw: &str, key: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn get_required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    parse_date(&raw, key)
}

pub fn get_patch(params: &Value) -> Result<&serde_json::Map<String, Value>, HandlerErr> {
    params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))
}

pub fn get_string_list(v: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(items) = v.as_array() else {
        return Err(HandlerErr::bad_params(format!("{} must be an array", key)));
    };
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let Some(s) = item.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(HandlerErr::bad_params(format!(
                "{} must contain non-empty strings",
                key
            )));
        };
        if !out.iter().any(|o| o == s) {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

pub fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    use rusqlite::OptionalExtension;
    Ok(conn
        .query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}
