use crate::db;
use crate::ipc::helpers::{with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::tracking::AdvancePolicy;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Tracking,
    Transport,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "tracking" => Some(Self::Tracking),
            "transport" => Some(Self::Transport),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Tracking => "setup.tracking",
            Self::Transport => "setup.transport",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Tracking => json!({
            "advancePolicy": "permissive"
        }),
        SetupSection::Transport => json!({
            "departmentName": "Transport",
            "driverIdPrefix": "D"
        }),
    }
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Tracking => match k.as_str() {
                "advancePolicy" => {
                    let p = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    let Some(policy) = AdvancePolicy::parse(&p) else {
                        return Err("advancePolicy must be one of: permissive, strict".into());
                    };
                    obj.insert(k.clone(), Value::String(policy.as_str().to_string()));
                }
                _ => return Err(format!("unknown tracking field: {}", k)),
            },
            SetupSection::Transport => match k.as_str() {
                "departmentName" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 60)?));
                }
                "driverIdPrefix" => {
                    let p = parse_string_max(v, k, 3)?;
                    if !p.chars().all(|c| c.is_ascii_uppercase()) {
                        return Err("driverIdPrefix must be 1-3 uppercase letters".into());
                    }
                    obj.insert(k.clone(), Value::String(p));
                }
                _ => return Err(format!("unknown transport field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults.
            let mut candidate = current.clone();
            if merge_section_patch(section, &mut candidate, saved_obj).is_ok() {
                current = candidate;
            } else {
                tracing::warn!(key = section.key(), "ignoring malformed saved settings");
            }
        }
    }
    Ok(current)
}

pub fn advance_policy(conn: &rusqlite::Connection) -> Result<AdvancePolicy, HandlerErr> {
    let section = load_section(conn, SetupSection::Tracking)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(section
        .get("advancePolicy")
        .and_then(|v| v.as_str())
        .and_then(AdvancePolicy::parse)
        .unwrap_or_default())
}

pub struct TransportSettings {
    pub department_name: String,
    pub driver_id_prefix: String,
}

pub fn transport_settings(conn: &rusqlite::Connection) -> Result<TransportSettings, HandlerErr> {
    let section = load_section(conn, SetupSection::Transport)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let field = |k: &str, fallback: &str| {
        section
            .get(k)
            .and_then(|v| v.as_str())
            .unwrap_or(fallback)
            .to_string()
    };
    Ok(TransportSettings {
        department_name: field("departmentName", "Transport"),
        driver_id_prefix: field("driverIdPrefix", "D"),
    })
}

fn setup_get(conn: &rusqlite::Connection, _req: &Request) -> Result<Value, HandlerErr> {
    let tracking = load_section(conn, SetupSection::Tracking)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let transport = load_section(conn, SetupSection::Transport)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({
        "tracking": tracking,
        "transport": transport
    }))
}

fn setup_update(conn: &rusqlite::Connection, req: &Request) -> Result<Value, HandlerErr> {
    crate::ipc::helpers::require_admin(req)?;
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing section"));
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let patch_obj = crate::ipc::helpers::get_patch(&req.params)?;

    let mut current =
        load_section(conn, section).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    merge_section_patch(section, &mut current, patch_obj).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tracing::info!(section = section_raw, "settings updated");
    Ok(json!({ "section": section_raw, "values": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(with_db(state, req, setup_get)),
        "setup.update" => Some(with_db(state, req, setup_update)),
        _ => None,
    }
}
