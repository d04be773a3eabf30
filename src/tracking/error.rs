/// Failures of the route progress tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("route {0} {1}")]
    InvalidRoute(String, &'static str),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Vehicle not found: {0}")]
    VehicleNotFound(String),

    #[error("Stop not found in route: {0}")]
    StopNotFound(String),

    #[error("Vehicle history not found: {0}")]
    TrackerNotFound(String),

    #[error("Not authorized")]
    Forbidden,

    #[error("stop {stop} is {status}, only the Next stop may be advanced")]
    OutOfOrder { stop: String, status: &'static str },

    #[error("vehicle history {0} was modified concurrently")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Persistence(String),
}

impl TrackerError {
    /// Wire error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRoute(..) => "invalid_route",
            Self::RouteNotFound(_)
            | Self::VehicleNotFound(_)
            | Self::StopNotFound(_)
            | Self::TrackerNotFound(_) => "not_found",
            Self::Forbidden => "forbidden",
            Self::OutOfOrder { .. } => "out_of_order",
            Self::Conflict(_) => "conflict",
            Self::Persistence(_) => "db_failed",
        }
    }

    /// Caller-facing status class.
    pub fn status(&self) -> &'static str {
        match self {
            Self::InvalidRoute(..) | Self::OutOfOrder { .. } => "bad_request",
            Self::RouteNotFound(_)
            | Self::VehicleNotFound(_)
            | Self::StopNotFound(_)
            | Self::TrackerNotFound(_) => "not_found",
            Self::Forbidden => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::Persistence(_) => "server_error",
        }
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
