use super::error::TrackerError;
use super::model::{NewTracker, ProgressTracker, RouteTemplate, TrackerFilter, VehicleRef};

pub trait RouteLookup {
    fn route_by_id(&self, id: &str) -> Result<Option<RouteTemplate>, TrackerError>;
}

pub trait VehicleLookup {
    fn vehicle_by_id(&self, id: &str) -> Result<Option<VehicleRef>, TrackerError>;
}

/// Storage for tracker documents. Every method reads or writes one whole
/// tracker; `save_tracker` must be atomic per tracker and reject a write whose
/// `version` no longer matches the stored one.
pub trait TrackerStore {
    fn create_tracker(&self, doc: NewTracker) -> Result<ProgressTracker, TrackerError>;
    fn tracker_by_id(&self, id: &str) -> Result<Option<ProgressTracker>, TrackerError>;
    fn save_tracker(&self, doc: &ProgressTracker) -> Result<ProgressTracker, TrackerError>;
    fn list_trackers(&self, filter: &TrackerFilter) -> Result<Vec<ProgressTracker>, TrackerError>;
}
