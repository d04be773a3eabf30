use serde::{Deserialize, Serialize};

use super::model::VehicleRef;

/// The authenticated caller, resolved by the host before a request reaches the
/// sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Principal {
    Admin { id: String },
    Teacher { id: String },
    Student { id: String },
    Parent { id: String },
    Driver { id: String },
}

impl Principal {
    pub fn id(&self) -> &str {
        match self {
            Self::Admin { id }
            | Self::Teacher { id }
            | Self::Student { id }
            | Self::Parent { id }
            | Self::Driver { id } => id,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::Admin { .. } => "admin",
            Self::Teacher { .. } => "teacher",
            Self::Student { .. } => "student",
            Self::Parent { .. } => "parent",
            Self::Driver { .. } => "driver",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin { .. })
    }
}

pub trait AuthorizationGuard {
    fn can_mutate(&self, principal: &Principal, vehicle: &VehicleRef) -> bool;
}

/// Admins may touch any vehicle; drivers only the vehicles they are assigned to.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleGuard;

impl AuthorizationGuard for RoleGuard {
    fn can_mutate(&self, principal: &Principal, vehicle: &VehicleRef) -> bool {
        match principal {
            Principal::Admin { .. } => true,
            Principal::Driver { id } => vehicle.driver_ids.iter().any(|d| d == id),
            _ => false,
        }
    }
}
