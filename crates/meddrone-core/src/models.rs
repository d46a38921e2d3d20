//! Data model shared by the planner, optimizer and dispatch runtime.
//!
//! The registry-facing types (`Drone`, `ServicePointDrones`, `RestrictedArea`,
//! availability slots) mirror the external fleet registry's JSON shapes and
//! use camelCase on the wire.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// A raw lng/lat coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lng: f64,
    pub lat: f64,
}

impl Position {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

/// A delivery drone as published by the fleet registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drone {
    pub id: String,
    pub name: String,
    pub capability: DroneCapability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneCapability {
    pub capacity: f64,
    pub cooling: bool,
    pub heating: bool,
    pub max_moves: u32,
    pub cost_per_move: f64,
    pub cost_initial: f64,
    pub cost_final: f64,
}

impl DroneCapability {
    /// Fixed cost of any flight regardless of length.
    pub fn fixed_cost(&self) -> f64 {
        self.cost_initial + self.cost_final
    }
}

/// What a dispatch task demands from the drone that takes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequirements {
    pub capacity: f64,
    #[serde(default)]
    pub cooling: bool,
    #[serde(default)]
    pub heating: bool,
    /// Per-task cost budget; `<= 0` means unconstrained.
    #[serde(default)]
    pub max_cost: f64,
}

/// One medical delivery task from a dispatch batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchTask {
    pub id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub requirements: TaskRequirements,
    pub delivery: Option<Position>,
}

/// A dispatch task escalated to an emergency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyTask {
    #[serde(flatten)]
    pub task: DispatchTask,
    /// Severity, `>= 1`. Level 5 and above authorizes restricted-area bypass.
    pub emergency_level: i32,
}

impl EmergencyTask {
    /// Levels 1-4 need a human sign-off before flying through a blockage.
    pub fn requires_confirmation(&self) -> bool {
        (1..=4).contains(&self.emergency_level)
    }

    pub fn bypass_authorized(&self) -> bool {
        self.emergency_level >= 5
    }
}

/// A no-fly polygon. The vertex ring may be open or closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestrictedArea {
    pub id: i64,
    pub name: String,
    pub vertices: Vec<Position>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePoint {
    pub id: i64,
    pub name: String,
    pub location: Position,
}

/// Weekly availability roster entry for one service point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePointDrones {
    pub service_point_id: i64,
    pub drones: Vec<DroneAvailability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroneAvailability {
    pub id: String,
    pub availability: Vec<AvailabilitySlot>,
}

/// One weekly window, as delivered by the registry: a day name plus
/// `HH:MM` bounds, both inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySlot {
    pub day_of_week: String,
    pub from: String,
    pub until: String,
}

/// One leg of travel: an ordered waypoint list tied to the task it serves.
/// `task_id` is `None` for return-to-base and idle-hover legs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightSegment {
    pub task_id: Option<i64>,
    pub path: Vec<Position>,
}

impl FlightSegment {
    /// Moves consumed by flying this segment (waypoint transitions).
    pub fn moves(&self) -> u32 {
        self.path.len().saturating_sub(1) as u32
    }
}

/// A drone's full ordered segment sequence for one dispatch batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DronePlan {
    pub drone_id: String,
    pub segments: Vec<FlightSegment>,
}

impl DronePlan {
    pub fn total_moves(&self) -> u32 {
        self.segments.iter().map(FlightSegment::moves).sum()
    }
}

/// The optimizer's output: per-drone plans plus batch totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryPlan {
    pub drone_plans: Vec<DronePlan>,
    pub total_cost: f64,
    pub total_moves: u32,
}

impl DeliveryPlan {
    pub fn is_empty(&self) -> bool {
        self.drone_plans.is_empty()
    }
}
