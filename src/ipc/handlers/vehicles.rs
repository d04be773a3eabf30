use crate::db::now_rfc3339;
use crate::ipc::helpers::{
    get_patch, get_required_str, get_string_list, optional_str, require_admin, require_principal,
    required_str, row_exists, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const VEHICLE_TYPES: [&str; 2] = ["Bus", "Van"];
const VEHICLE_STATUSES: [&str; 2] = ["Active", "Inactive"];

fn parse_choice(v: &Value, key: &str, allowed: &[&str]) -> Result<String, HandlerErr> {
    let s = v
        .as_str()
        .map(str::trim)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string", key)))?;
    allowed
        .iter()
        .find(|a| a.eq_ignore_ascii_case(s))
        .map(|a| a.to_string())
        .ok_or_else(|| {
            HandlerErr::bad_params(format!("{} must be one of: {}", key, allowed.join(", ")))
        })
}

fn ensure_registration_free(
    conn: &Connection,
    registration_number: &str,
    except_id: Option<&str>,
) -> Result<(), HandlerErr> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM vehicles WHERE registration_number = ?",
            [registration_number],
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(id) if Some(id.as_str()) != except_id => Err(HandlerErr::new(
            "duplicate",
            "Vehicle with this registration number already exists",
        )
        .with_details(json!({ "registrationNumber": registration_number }))),
        _ => Ok(()),
    }
}

fn ensure_drivers_exist(conn: &Connection, driver_ids: &[String]) -> Result<(), HandlerErr> {
    for id in driver_ids {
        if !row_exists(conn, "SELECT 1 FROM drivers WHERE id = ?", id)? {
            return Err(HandlerErr::not_found("driver not found")
                .with_details(json!({ "driverId": id })));
        }
    }
    Ok(())
}

fn replace_drivers(conn: &Connection, vehicle_id: &str, driver_ids: &[String]) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM vehicle_drivers WHERE vehicle_id = ?", [vehicle_id])?;
    for (i, driver_id) in driver_ids.iter().enumerate() {
        conn.execute(
            "INSERT INTO vehicle_drivers(vehicle_id, driver_id, sort_order) VALUES(?, ?, ?)",
            (vehicle_id, driver_id, i as i64),
        )?;
    }
    Ok(())
}

/// Vehicle with its drivers and current route filled in.
pub fn vehicle_json(conn: &Connection, vehicle_id: &str) -> Result<Option<Value>, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT v.id, v.registration_number, v.vehicle_type, v.status,
                    v.current_route_id, r.name, v.created_at, v.updated_at
             FROM vehicles v
             LEFT JOIN routes r ON r.id = v.current_route_id
             WHERE v.id = ?",
            [vehicle_id],
            |r| {
                let route_id: Option<String> = r.get(4)?;
                let route_name: Option<String> = r.get(5)?;
                let current_route = match (route_id, route_name) {
                    (Some(id), Some(name)) => json!({ "id": id, "name": name }),
                    _ => Value::Null,
                };
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "registrationNumber": r.get::<_, String>(1)?,
                    "type": r.get::<_, String>(2)?,
                    "status": r.get::<_, String>(3)?,
                    "currentRoute": current_route,
                    "createdAt": r.get::<_, String>(6)?,
                    "updatedAt": r.get::<_, String>(7)?,
                }))
            },
        )
        .optional()?;
    let Some(mut vehicle) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT d.id, s.name, s.phone_no
         FROM vehicle_drivers vd
         JOIN drivers d ON d.id = vd.driver_id
         JOIN staff s ON s.id = d.staff_id
         WHERE vd.vehicle_id = ?
         ORDER BY vd.sort_order",
    )?;
    let drivers = stmt
        .query_map([vehicle_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "phoneNo": r.get::<_, String>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    vehicle["driver"] = Value::Array(drivers);
    Ok(Some(vehicle))
}

fn vehicles_create(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(req)?;
    let registration_number = get_required_str(&req.params, "registrationNumber")
        .map_err(|_| HandlerErr::bad_params("registrationNumber or type are required"))?;
    let vehicle_type = match req.params.get("type") {
        Some(v) if !v.is_null() => parse_choice(v, "type", &VEHICLE_TYPES)?,
        _ => return Err(HandlerErr::bad_params("registrationNumber or type are required")),
    };
    let driver_ids = match req.params.get("driverIds") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => get_string_list(v, "driverIds")?,
    };

    ensure_registration_free(conn, &registration_number, None)?;
    ensure_drivers_exist(conn, &driver_ids)?;

    let vehicle_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "INSERT INTO vehicles(id, registration_number, vehicle_type, status, current_route_id, created_at, updated_at)
         VALUES(?, ?, ?, 'Active', NULL, ?, ?)",
        (&vehicle_id, &registration_number, &vehicle_type, &now, &now),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "vehicles" })))?;
    replace_drivers(&tx, &vehicle_id, &driver_ids).map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "vehicle_drivers" }))
    })?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    tracing::info!(vehicle = %vehicle_id, registration = %registration_number, "vehicle added");
    let vehicle = vehicle_json(conn, &vehicle_id)?
        .ok_or_else(|| HandlerErr::not_found("Vehicle not found"))?;
    Ok(json!({ "vehicle": vehicle }))
}

fn vehicles_update(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(req)?;
    let vehicle_id = get_required_str(&req.params, "vehicleId")?;
    let patch = get_patch(&req.params)?;
    if !row_exists(conn, "SELECT 1 FROM vehicles WHERE id = ?", &vehicle_id)? {
        return Err(HandlerErr::not_found("Vehicle not found"));
    }

    let mut sets: Vec<&'static str> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    let mut new_drivers: Option<Vec<String>> = None;
    for (k, v) in patch {
        match k.as_str() {
            "registrationNumber" => {
                let reg = required_str(Some(v), k)?;
                ensure_registration_free(conn, &reg, Some(&vehicle_id))?;
                sets.push("registration_number = ?");
                binds.push(reg.into());
            }
            "type" => {
                sets.push("vehicle_type = ?");
                binds.push(parse_choice(v, "type", &VEHICLE_TYPES)?.into());
            }
            "status" => {
                sets.push("status = ?");
                binds.push(parse_choice(v, "status", &VEHICLE_STATUSES)?.into());
            }
            "currentRouteId" => {
                let route_id = optional_str(Some(v), k)?;
                if let Some(r) = &route_id {
                    if !row_exists(conn, "SELECT 1 FROM routes WHERE id = ?", r)? {
                        return Err(HandlerErr::not_found("Route not found"));
                    }
                }
                sets.push("current_route_id = ?");
                binds.push(match route_id {
                    Some(r) => r.into(),
                    None => rusqlite::types::Value::Null,
                });
            }
            "driverIds" => {
                let ids = get_string_list(v, "driverIds")?;
                ensure_drivers_exist(conn, &ids)?;
                new_drivers = Some(ids);
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown vehicle field: {}", k))),
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    sets.push("updated_at = ?");
    binds.push(now_rfc3339().into());
    binds.push(vehicle_id.clone().into());
    let sql = format!("UPDATE vehicles SET {} WHERE id = ?", sets.join(", "));
    tx.execute(&sql, rusqlite::params_from_iter(binds))
        .map_err(|e| HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "vehicles" })))?;
    if let Some(ids) = &new_drivers {
        replace_drivers(&tx, &vehicle_id, ids).map_err(|e| {
            HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "vehicle_drivers" }))
        })?;
    }
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let vehicle = vehicle_json(conn, &vehicle_id)?
        .ok_or_else(|| HandlerErr::not_found("Vehicle not found"))?;
    Ok(json!({ "vehicle": vehicle }))
}

fn vehicles_get(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_principal(req)?;
    let vehicle_id = get_required_str(&req.params, "vehicleId")?;
    let vehicle = vehicle_json(conn, &vehicle_id)?
        .ok_or_else(|| HandlerErr::not_found("Vehicle not found"))?;
    Ok(json!({ "vehicle": vehicle }))
}

fn vehicles_list(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_principal(req)?;
    let mut stmt = conn.prepare("SELECT id FROM vehicles ORDER BY created_at DESC, rowid DESC")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut vehicles: Vec<Value> = Vec::with_capacity(ids.len());
    for id in &ids {
        if let Some(v) = vehicle_json(conn, id)? {
            vehicles.push(v);
        }
    }
    Ok(json!({ "count": vehicles.len(), "vehicles": vehicles }))
}

fn vehicles_delete(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(req)?;
    let vehicle_id = get_required_str(&req.params, "vehicleId")?;
    if !row_exists(conn, "SELECT 1 FROM vehicles WHERE id = ?", &vehicle_id)? {
        return Err(HandlerErr::not_found("Vehicle not found"));
    }
    let history_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM vehicle_history WHERE vehicle_id = ?",
        [&vehicle_id],
        |r| r.get(0),
    )?;
    if history_count > 0 {
        return Err(HandlerErr::new("in_use", "vehicle has tracking history")
            .with_details(json!({ "historyCount": history_count })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    // No ON DELETE CASCADE; clear references in dependency order.
    for (table, sql) in [
        ("vehicle_drivers", "DELETE FROM vehicle_drivers WHERE vehicle_id = ?"),
        ("drivers", "UPDATE drivers SET assigned_vehicle_id = NULL WHERE assigned_vehicle_id = ?"),
        ("routes", "UPDATE routes SET vehicle_id = NULL WHERE vehicle_id = ?"),
        ("vehicles", "DELETE FROM vehicles WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&vehicle_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": table })));
        }
    }
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    tracing::info!(vehicle = %vehicle_id, "vehicle deleted");
    Ok(json!({ "deleted": true, "message": "Vehicle deleted successfully" }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "vehicles.create" => Some(with_db(state, req, vehicles_create)),
        "vehicles.update" => Some(with_db(state, req, vehicles_update)),
        "vehicles.get" => Some(with_db(state, req, vehicles_get)),
        "vehicles.list" => Some(with_db(state, req, vehicles_list)),
        "vehicles.delete" => Some(with_db(state, req, vehicles_delete)),
        _ => None,
    }
}
