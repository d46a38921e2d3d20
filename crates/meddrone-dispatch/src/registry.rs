//! Fleet registry port.
//!
//! The external registry owns the drone roster, service points, weekly
//! availability windows and the static restricted-area set. Implementations
//! must degrade read failures to empty collections so a registry outage
//! never crashes the dispatch engine.

use meddrone_core::models::{
    Drone, Position, RestrictedArea, ServicePoint, ServicePointDrones,
};
use meddrone_core::optimizer::FleetContext;

/// Read-only view of the external fleet registry.
pub trait FleetDirectory: Send + Sync {
    fn drones(&self) -> Vec<Drone>;
    fn service_points(&self) -> Vec<ServicePoint>;
    fn availability(&self) -> Vec<ServicePointDrones>;
    fn restricted_areas(&self) -> Vec<RestrictedArea>;
}

/// In-memory directory backed by fixed collections. Used by the demo binary
/// and tests; a networked implementation plugs in behind the same trait.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    pub drones: Vec<Drone>,
    pub service_points: Vec<ServicePoint>,
    pub availability: Vec<ServicePointDrones>,
    pub restricted_areas: Vec<RestrictedArea>,
}

impl FleetDirectory for StaticDirectory {
    fn drones(&self) -> Vec<Drone> {
        self.drones.clone()
    }

    fn service_points(&self) -> Vec<ServicePoint> {
        self.service_points.clone()
    }

    fn availability(&self) -> Vec<ServicePointDrones> {
        self.availability.clone()
    }

    fn restricted_areas(&self) -> Vec<RestrictedArea> {
        self.restricted_areas.clone()
    }
}

/// One consistent read of the whole directory. Taken once per request so a
/// batch is planned against a single registry view.
#[derive(Debug, Default, Clone)]
pub struct FleetSnapshot {
    pub drones: Vec<Drone>,
    pub service_points: Vec<ServicePoint>,
    pub roster: Vec<ServicePointDrones>,
    pub restricted_areas: Vec<RestrictedArea>,
}

impl FleetSnapshot {
    pub fn from_directory(directory: &dyn FleetDirectory) -> Self {
        Self {
            drones: directory.drones(),
            service_points: directory.service_points(),
            roster: directory.availability(),
            restricted_areas: directory.restricted_areas(),
        }
    }

    /// Borrowed view the optimizer works against.
    pub fn context(&self) -> FleetContext<'_> {
        FleetContext {
            roster: &self.roster,
            service_points: &self.service_points,
            restricted_areas: &self.restricted_areas,
        }
    }

    pub fn drone_by_id(&self, drone_id: &str) -> Option<&Drone> {
        self.drones.iter().find(|d| d.id == drone_id)
    }

    pub fn service_point_for(&self, drone_id: &str) -> Option<Position> {
        self.context().service_point_for(drone_id)
    }
}
