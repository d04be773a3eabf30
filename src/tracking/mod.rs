//! Route progress tracking: per-vehicle, per-day snapshots of a route's stops
//! and the stop-by-stop state machine that advances them.

pub mod auth;
pub mod error;
pub mod model;
pub mod ports;
pub mod sqlite;
pub mod tracker;

pub use auth::Principal;
pub use error::TrackerError;
pub use model::{ProgressTracker, TrackerFilter};
pub use sqlite::SqliteTracking;
pub use tracker::{AdvancePolicy, Tracking};
