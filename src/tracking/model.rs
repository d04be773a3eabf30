use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

/// Per-stop traversal status. A stop only ever moves forward through
/// `Pending -> Next -> Reached -> Left`; the last stop of a route stays
/// `Reached`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopStatus {
    Pending,
    Next,
    Reached,
    Left,
}

impl StopStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Next => "Next",
            Self::Reached => "Reached",
            Self::Left => "Left",
        }
    }
}

/// A stop inside a tracker snapshot. Field names on the wire (`stop`,
/// `reached`, `arrivalTime`) are relied on by the map view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    #[serde(rename = "stop")]
    pub name: String,
    #[serde(flatten)]
    pub position: Position,
    #[serde(rename = "reached")]
    pub status: StopStatus,
    pub arrival_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteStop {
    pub name: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteTemplate {
    pub id: String,
    pub name: String,
    pub stops: Vec<RouteStop>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleRef {
    pub id: String,
    pub driver_ids: Vec<String>,
}

/// Tracker fields before the store has assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTracker {
    pub vehicle_id: String,
    pub route_id: String,
    pub date: NaiveDate,
    pub stops: Vec<Stop>,
}

/// One traversal of a route by a vehicle on a date.
///
/// `stops` is a copy of the route's stops taken at start time, so later route
/// edits never reach an in-flight tracker. `version` is bumped by the store on
/// every save and guards against lost updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressTracker {
    pub id: String,
    #[serde(rename = "vehicle")]
    pub vehicle_id: String,
    #[serde(rename = "route")]
    pub route_id: String,
    pub date: NaiveDate,
    pub stops: Vec<Stop>,
    pub completed: bool,
    pub version: i64,
}

impl ProgressTracker {
    /// Index of the first stop carrying `name`. Duplicate names resolve to the
    /// earliest occurrence.
    pub fn stop_index(&self, name: &str) -> Option<usize> {
        self.stops.iter().position(|s| s.name == name)
    }

    pub fn frontier(&self) -> Option<usize> {
        self.stops.iter().position(|s| s.status == StopStatus::Next)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerFilter {
    pub vehicle_id: Option<String>,
    pub date: Option<NaiveDate>,
}
