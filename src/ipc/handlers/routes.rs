use crate::db::now_rfc3339;
use crate::ipc::helpers::{
    get_optional_str, get_patch, get_required_str, optional_str, require_admin, require_principal,
    required_str, row_exists, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
struct StopInput {
    sequence: i64,
    name: String,
    lat: f64,
    lng: f64,
}

/// Validates a stop list and returns it ordered by `sequence`.
fn parse_stops(v: &Value) -> Result<Vec<StopInput>, HandlerErr> {
    let items = match v.as_array() {
        Some(a) if !a.is_empty() => a,
        _ => return Err(HandlerErr::bad_params("Stops must be a non-empty array")),
    };
    let mut stops: Vec<StopInput> = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let invalid = || {
            HandlerErr::bad_params(format!(
                "Invalid stop data at index {}. All stops must have stop name, longitude, latitude, and sequence.",
                i
            ))
            .with_details(json!({ "index": i }))
        };
        let name = item
            .get("stop")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(invalid)?;
        let lat = item
            .get("lat")
            .and_then(|v| v.as_f64())
            .filter(|l| (-90.0..=90.0).contains(l))
            .ok_or_else(invalid)?;
        let lng = item
            .get("lng")
            .and_then(|v| v.as_f64())
            .filter(|l| (-180.0..=180.0).contains(l))
            .ok_or_else(invalid)?;
        let sequence = item
            .get("sequence")
            .and_then(|v| v.as_i64())
            .filter(|s| *s > 0)
            .ok_or_else(invalid)?;
        if stops.iter().any(|s| s.sequence == sequence) {
            return Err(HandlerErr::bad_params(format!("duplicate stop sequence {}", sequence))
                .with_details(json!({ "index": i })));
        }
        if stops.iter().any(|s| s.name == name) {
            return Err(HandlerErr::bad_params(format!("duplicate stop name {}", name))
                .with_details(json!({ "index": i, "stop": name })));
        }
        stops.push(StopInput {
            sequence,
            name: name.to_string(),
            lat,
            lng,
        });
    }
    stops.sort_by_key(|s| s.sequence);
    Ok(stops)
}

fn ensure_vehicle(conn: &Connection, vehicle_id: Option<&str>) -> Result<(), HandlerErr> {
    if let Some(id) = vehicle_id {
        if !row_exists(conn, "SELECT 1 FROM vehicles WHERE id = ?", id)? {
            return Err(HandlerErr::not_found("Vehicle not found"));
        }
    }
    Ok(())
}

fn write_stops(conn: &Connection, route_id: &str, stops: &[StopInput]) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM route_stops WHERE route_id = ?", [route_id])?;
    for s in stops {
        conn.execute(
            "INSERT INTO route_stops(route_id, sequence, name, lat, lng) VALUES(?, ?, ?, ?, ?)",
            (route_id, s.sequence, &s.name, s.lat, s.lng),
        )?;
    }
    Ok(())
}

fn route_json(conn: &Connection, route_id: &str) -> Result<Option<Value>, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT r.id, r.name, v.id, v.registration_number, r.created_at, r.updated_at
             FROM routes r
             LEFT JOIN vehicles v ON v.id = r.vehicle_id
             WHERE r.id = ?",
            [route_id],
            |r| {
                let vehicle = match r.get::<_, Option<String>>(2)? {
                    Some(id) => json!({ "id": id, "registrationNumber": r.get::<_, String>(3)? }),
                    None => Value::Null,
                };
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "vehicle": vehicle,
                    "createdAt": r.get::<_, String>(4)?,
                    "updatedAt": r.get::<_, String>(5)?,
                }))
            },
        )
        .optional()?;
    let Some(mut route) = row else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT sequence, name, lat, lng FROM route_stops WHERE route_id = ? ORDER BY sequence",
    )?;
    let stops = stmt
        .query_map([route_id], |r| {
            Ok(json!({
                "sequence": r.get::<_, i64>(0)?,
                "stop": r.get::<_, String>(1)?,
                "lat": r.get::<_, f64>(2)?,
                "lng": r.get::<_, f64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    route["stops"] = Value::Array(stops);
    Ok(Some(route))
}

fn routes_create(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(req)?;
    let name = get_required_str(&req.params, "name")?;
    let vehicle_id = get_optional_str(&req.params, "vehicleId")?;
    let stops = parse_stops(req.params.get("stops").unwrap_or(&Value::Null))?;
    ensure_vehicle(conn, vehicle_id.as_deref())?;

    let route_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "INSERT INTO routes(id, name, vehicle_id, created_at, updated_at) VALUES(?, ?, ?, ?, ?)",
        (&route_id, &name, &vehicle_id, &now, &now),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "routes" })))?;
    write_stops(&tx, &route_id, &stops).map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "route_stops" }))
    })?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    tracing::info!(route = %route_id, stops = stops.len(), "route created");
    let route = route_json(conn, &route_id)?.ok_or_else(|| HandlerErr::not_found("Route not found"))?;
    Ok(json!({ "route": route }))
}

fn routes_update(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(req)?;
    let route_id = get_required_str(&req.params, "routeId")?;
    let patch = get_patch(&req.params)?;
    if !row_exists(conn, "SELECT 1 FROM routes WHERE id = ?", &route_id)? {
        return Err(HandlerErr::not_found("Route not found"));
    }

    let mut name: Option<String> = None;
    let mut vehicle: Option<Option<String>> = None;
    let mut stops: Option<Vec<StopInput>> = None;
    for (k, v) in patch {
        match k.as_str() {
            "name" => name = Some(required_str(Some(v), k)?),
            "vehicleId" => {
                let id = optional_str(Some(v), k)?;
                ensure_vehicle(conn, id.as_deref())?;
                vehicle = Some(id);
            }
            "stops" => stops = Some(parse_stops(v)?),
            _ => return Err(HandlerErr::bad_params(format!("unknown route field: {}", k))),
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let update = |sql: &str, value: &Option<String>| {
        tx.execute(sql, (value, &route_id)).map_err(|e| {
            HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "routes" }))
        })
    };
    if let Some(n) = &name {
        update("UPDATE routes SET name = ? WHERE id = ?", &Some(n.clone()))?;
    }
    if let Some(v) = &vehicle {
        update("UPDATE routes SET vehicle_id = ? WHERE id = ?", v)?;
    }
    update("UPDATE routes SET updated_at = ? WHERE id = ?", &Some(now_rfc3339()))?;
    // Trackers already started keep the stop snapshot they were created with.
    if let Some(s) = &stops {
        write_stops(&tx, &route_id, s).map_err(|e| {
            HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "route_stops" }))
        })?;
    }
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let route = route_json(conn, &route_id)?.ok_or_else(|| HandlerErr::not_found("Route not found"))?;
    Ok(json!({ "route": route }))
}

fn routes_get(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_principal(req)?;
    let route_id = get_required_str(&req.params, "routeId")?;
    let route = route_json(conn, &route_id)?.ok_or_else(|| HandlerErr::not_found("Route not found"))?;
    Ok(json!({ "route": route }))
}

fn routes_list(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_principal(req)?;
    let mut stmt = conn.prepare(
        "SELECT r.id, r.name, r.vehicle_id,
                (SELECT COUNT(*) FROM route_stops rs WHERE rs.route_id = r.id) AS stop_count
         FROM routes r
         ORDER BY r.name",
    )?;
    let routes = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "vehicleId": r.get::<_, Option<String>>(2)?,
                "stopCount": r.get::<_, i64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "routes": routes }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "routes.create" => Some(with_db(state, req, routes_create)),
        "routes.update" => Some(with_db(state, req, routes_update)),
        "routes.get" => Some(with_db(state, req, routes_get)),
        "routes.list" => Some(with_db(state, req, routes_list)),
        _ => None,
    }
}
