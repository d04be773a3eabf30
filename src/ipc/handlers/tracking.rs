use crate::ipc::handlers::setup::advance_policy;
use crate::ipc::helpers::{
    get_optional_str, get_required_date, get_required_str, parse_date, require_principal, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::tracking::{AdvancePolicy, SqliteTracking, TrackerFilter, Tracking};
use rusqlite::Connection;
use serde_json::{json, Value};

fn history_json(t: &crate::tracking::ProgressTracker) -> Result<Value, HandlerErr> {
    serde_json::to_value(t).map_err(|e| HandlerErr::db("serialize_failed", e))
}

fn tracking_start(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let principal = require_principal(req)?;
    let vehicle_id = get_required_str(&req.params, "vehicleId")?;
    let route_id = get_required_str(&req.params, "routeId")?;
    let date = get_required_date(&req.params, "date")?;

    let store = SqliteTracking::new(conn);
    let tracking = Tracking::new(&store, advance_policy(conn)?);
    let history = tracking.start(&vehicle_id, &route_id, date, principal)?;
    Ok(json!({ "history": history_json(&history)? }))
}

fn tracking_advance(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let principal = require_principal(req)?;
    let history_id = get_required_str(&req.params, "historyId")?;
    let stop_name = get_required_str(&req.params, "stopName")?;

    let store = SqliteTracking::new(conn);
    let tracking = Tracking::new(&store, advance_policy(conn)?);
    let history = tracking.advance(&history_id, &stop_name, principal)?;
    Ok(json!({ "history": history_json(&history)? }))
}

fn tracking_get(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_principal(req)?;
    let history_id = get_required_str(&req.params, "historyId")?;

    let store = SqliteTracking::new(conn);
    // Reads never consult the advance policy.
    let history = Tracking::new(&store, AdvancePolicy::default()).get(&history_id)?;
    Ok(json!({ "history": history_json(&history)? }))
}

fn tracking_list(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_principal(req)?;
    let filter = TrackerFilter {
        vehicle_id: get_optional_str(&req.params, "vehicleId")?,
        date: get_optional_str(&req.params, "date")?
            .map(|d| parse_date(&d, "date"))
            .transpose()?,
    };

    let store = SqliteTracking::new(conn);
    let histories = Tracking::new(&store, AdvancePolicy::default()).list(&filter)?;
    let items = histories
        .iter()
        .map(history_json)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "count": items.len(), "histories": items }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tracking.start" => Some(with_db(state, req, tracking_start)),
        "tracking.advance" => Some(with_db(state, req, tracking_advance)),
        "tracking.get" => Some(with_db(state, req, tracking_get)),
        "tracking.list" => Some(with_db(state, req, tracking_list)),
        _ => None,
    }
}
