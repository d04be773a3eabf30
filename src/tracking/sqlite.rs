use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::now_rfc3339;

use super::error::TrackerError;
use super::model::{
    NewTracker, Position, ProgressTracker, RouteStop, RouteTemplate, Stop, TrackerFilter,
    VehicleRef,
};
use super::ports::{RouteLookup, TrackerStore, VehicleLookup};

const TRACKER_COLUMNS: &str = "id, vehicle_id, route_id, date, stops_json, completed, version";

/// Collaborators for the tracker backed by the workspace database.
pub struct SqliteTracking<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteTracking<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

fn tracker_from_row(row: &Row<'_>) -> rusqlite::Result<(ProgressTracker, String, String)> {
    let t = ProgressTracker {
        id: row.get(0)?,
        vehicle_id: row.get(1)?,
        route_id: row.get(2)?,
        // Placeholder until the text columns are parsed outside the row closure.
        date: NaiveDate::MIN,
        stops: Vec::new(),
        completed: row.get::<_, i64>(5)? != 0,
        version: row.get(6)?,
    };
    Ok((t, row.get(3)?, row.get(4)?))
}

fn finish_tracker(
    (mut t, date, stops_json): (ProgressTracker, String, String),
) -> Result<ProgressTracker, TrackerError> {
    t.date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
        TrackerError::Persistence(format!("bad date {:?} on vehicle history {}: {}", date, t.id, e))
    })?;
    t.stops = serde_json::from_str::<Vec<Stop>>(&stops_json)?;
    Ok(t)
}

impl RouteLookup for SqliteTracking<'_> {
    fn route_by_id(&self, id: &str) -> Result<Option<RouteTemplate>, TrackerError> {
        let name: Option<String> = self
            .conn
            .query_row("SELECT name FROM routes WHERE id = ?", [id], |r| r.get(0))
            .optional()?;
        let Some(name) = name else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT name, lat, lng FROM route_stops WHERE route_id = ? ORDER BY sequence",
        )?;
        let stops = stmt
            .query_map([id], |r| {
                Ok(RouteStop {
                    name: r.get(0)?,
                    position: Position {
                        lat: r.get(1)?,
                        lng: r.get(2)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(RouteTemplate {
            id: id.to_string(),
            name,
            stops,
        }))
    }
}

impl VehicleLookup for SqliteTracking<'_> {
    fn vehicle_by_id(&self, id: &str) -> Result<Option<VehicleRef>, TrackerError> {
        let exists: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM vehicles WHERE id = ?", [id], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }
        let mut stmt = self.conn.prepare(
            "SELECT driver_id FROM vehicle_drivers WHERE vehicle_id = ? ORDER BY sort_order",
        )?;
        let driver_ids = stmt
            .query_map([id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(VehicleRef {
            id: id.to_string(),
            driver_ids,
        }))
    }
}

impl TrackerStore for SqliteTracking<'_> {
    fn create_tracker(&self, doc: NewTracker) -> Result<ProgressTracker, TrackerError> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO vehicle_history(
               id, vehicle_id, route_id, date, stops_json, completed, version, created_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, 0, 1, ?, ?)",
            (
                &id,
                &doc.vehicle_id,
                &doc.route_id,
                doc.date.format("%Y-%m-%d").to_string(),
                serde_json::to_string(&doc.stops)?,
                &now,
                &now,
            ),
        )?;
        Ok(ProgressTracker {
            id,
            vehicle_id: doc.vehicle_id,
            route_id: doc.route_id,
            date: doc.date,
            stops: doc.stops,
            completed: false,
            version: 1,
        })
    }

    fn tracker_by_id(&self, id: &str) -> Result<Option<ProgressTracker>, TrackerError> {
        let sql = format!("SELECT {} FROM vehicle_history WHERE id = ?", TRACKER_COLUMNS);
        let raw = self
            .conn
            .query_row(&sql, [id], tracker_from_row)
            .optional()?;
        raw.map(finish_tracker).transpose()
    }

    fn save_tracker(&self, doc: &ProgressTracker) -> Result<ProgressTracker, TrackerError> {
        let changed = self.conn.execute(
            "UPDATE vehicle_history
             SET stops_json = ?, completed = ?, version = version + 1, updated_at = ?
             WHERE id = ? AND version = ?",
            (
                serde_json::to_string(&doc.stops)?,
                doc.completed as i64,
                now_rfc3339(),
                &doc.id,
                doc.version,
            ),
        )?;
        if changed == 0 {
            return match self.tracker_by_id(&doc.id)? {
                Some(_) => Err(TrackerError::Conflict(doc.id.clone())),
                None => Err(TrackerError::TrackerNotFound(doc.id.clone())),
            };
        }
        let mut saved = doc.clone();
        saved.version += 1;
        Ok(saved)
    }

    fn list_trackers(&self, filter: &TrackerFilter) -> Result<Vec<ProgressTracker>, TrackerError> {
        let mut sql = format!("SELECT {} FROM vehicle_history WHERE 1 = 1", TRACKER_COLUMNS);
        let mut binds: Vec<Value> = Vec::new();
        if let Some(v) = &filter.vehicle_id {
            sql.push_str(" AND vehicle_id = ?");
            binds.push(Value::Text(v.clone()));
        }
        if let Some(d) = filter.date {
            sql.push_str(" AND date = ?");
            binds.push(Value::Text(d.format("%Y-%m-%d").to_string()));
        }
        sql.push_str(" ORDER BY date DESC, created_at DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(binds), tracker_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(finish_tracker).collect()
    }
}
