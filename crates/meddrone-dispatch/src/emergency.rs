//! Emergency preemption engine.
//!
//! An emergency task picks its drone idle-first; with nobody idle, the
//! cheapest viable interruption of a busy drone wins. The emergency flight
//! path bypasses restricted-area avoidance entirely at high severity, and a
//! blocked path surfaces as a structured signal naming the blocking area.

use crate::registry::FleetSnapshot;
use crate::simulator::{DispatchSimulator, DroneStatus};
use meddrone_core::error::DispatchError;
use meddrone_core::models::{
    DispatchTask, Drone, EmergencyTask, FlightSegment, Position, RestrictedArea,
};
use meddrone_core::planner::{direct_path, find_path};
use meddrone_core::spatial::{distance, point_in_polygon, segment_crosses_polygon, STEP_LENGTH};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub const PUNITIVE_COST_INVALID: f64 = 1000.0;
pub const PUNITIVE_COST_FAILURE: f64 = 1500.0;
pub const REASSIGN_MULTIPLIER: f64 = 1.5;
pub const VIABILITY_FACTOR: f64 = 10.0;

const IDLE_SURCHARGE_DEFAULT: f64 = 5e-11;
const IDLE_SURCHARGE_BYPASS: f64 = 50.0;
const INTERRUPT_SURCHARGE_DEFAULT: f64 = 10.0;
const INTERRUPT_SURCHARGE_BYPASS: f64 = 1.5;

/// Result reported back to the caller on a committed dispatch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyOutcome {
    pub assigned_drone_id: String,
    pub final_cost: f64,
    pub base_cost: f64,
    pub message: String,
    pub success: bool,
}

/// Cost of pulling a busy drone off its plan.
pub fn interruption_cost(remaining_path_ratio: f64, cost_per_move: f64, task_count: usize) -> f64 {
    remaining_path_ratio * cost_per_move * (task_count as f64 + 1.0)
}

pub fn reassignment_cost(interrupt_cost: f64) -> f64 {
    interrupt_cost * REASSIGN_MULTIPLIER
}

pub fn is_viable(interrupt_cost: f64, reassign_cost: f64) -> bool {
    reassign_cost < interrupt_cost * VIABILITY_FACTOR
}

struct SurchargePolicy {
    idle: f64,
    interrupt_multiplier: f64,
}

pub struct EmergencyDispatcher {
    simulator: Arc<DispatchSimulator>,
}

impl EmergencyDispatcher {
    pub fn new(simulator: Arc<DispatchSimulator>) -> Self {
        Self { simulator }
    }

    /// Default dispatch entry point. Bypass only when the emergency level
    /// authorizes it.
    pub async fn dispatch(
        &self,
        emergency: &EmergencyTask,
        fleet: &FleetSnapshot,
        live_tasks: &HashMap<String, Vec<DispatchTask>>,
    ) -> Result<EmergencyOutcome, DispatchError> {
        self.dispatch_inner(
            emergency,
            fleet,
            live_tasks,
            false,
            SurchargePolicy {
                idle: IDLE_SURCHARGE_DEFAULT,
                interrupt_multiplier: INTERRUPT_SURCHARGE_DEFAULT,
            },
        )
        .await
    }

    /// Caller-forced bypass variant with its own surcharge policy.
    pub async fn dispatch_with_bypass(
        &self,
        emergency: &EmergencyTask,
        fleet: &FleetSnapshot,
        live_tasks: &HashMap<String, Vec<DispatchTask>>,
    ) -> Result<EmergencyOutcome, DispatchError> {
        self.dispatch_inner(
            emergency,
            fleet,
            live_tasks,
            true,
            SurchargePolicy {
                idle: IDLE_SURCHARGE_BYPASS,
                interrupt_multiplier: INTERRUPT_SURCHARGE_BYPASS,
            },
        )
        .await
    }

    async fn dispatch_inner(
        &self,
        emergency: &EmergencyTask,
        fleet: &FleetSnapshot,
        live_tasks: &HashMap<String, Vec<DispatchTask>>,
        force_bypass: bool,
        policy: SurchargePolicy,
    ) -> Result<EmergencyOutcome, DispatchError> {
        let task = &emergency.task;
        let delivery = task.delivery.ok_or_else(|| {
            DispatchError::Validation(format!(
                "emergency task {} is missing its delivery location",
                task.id
            ))
        })?;

        let candidates = candidate_drones(emergency, fleet);
        if candidates.is_empty() {
            tracing::warn!(task_id = task.id, "no capable drone for emergency");
            return Err(DispatchError::CostConstraintUnsatisfied);
        }

        // Idle-first: an untracked drone costs nothing to interrupt.
        if let Some(idle) = candidates
            .iter()
            .find(|drone| !live_tasks.contains_key(&drone.id))
        {
            return self
                .commit_idle(emergency, idle, &delivery, fleet, force_bypass, &policy)
                .await;
        }

        let Some((target, base_cost)) =
            self.cheapest_viable_interruption(&candidates, live_tasks)
        else {
            tracing::warn!(task_id = task.id, "no viable interruption candidate");
            return Err(DispatchError::CostConstraintUnsatisfied);
        };

        let Some(status) = self.simulator.status(&target.id) else {
            return Err(DispatchError::DroneNotFound(target.id.clone()));
        };
        let path = build_emergency_path(
            emergency,
            target,
            &status.current_position,
            &delivery,
            &fleet.restricted_areas,
            force_bypass,
        )?;

        self.simulator.insert_emergency(
            &target.id,
            task.clone(),
            FlightSegment {
                task_id: Some(task.id),
                path,
            },
        )?;

        let final_cost = base_cost + base_cost * policy.interrupt_multiplier;
        tracing::info!(
            task_id = task.id,
            drone_id = %target.id,
            base_cost,
            final_cost,
            "emergency dispatched by interruption"
        );
        Ok(EmergencyOutcome {
            assigned_drone_id: target.id.clone(),
            final_cost,
            base_cost,
            message: format!("emergency task {} interrupted drone {}", task.id, target.id),
            success: true,
        })
    }

    async fn commit_idle(
        &self,
        emergency: &EmergencyTask,
        drone: &Drone,
        delivery: &Position,
        fleet: &FleetSnapshot,
        force_bypass: bool,
        policy: &SurchargePolicy,
    ) -> Result<EmergencyOutcome, DispatchError> {
        let task = &emergency.task;
        let service_point = fleet.service_point_for(&drone.id);
        let start = match self.simulator.status(&drone.id) {
            Some(status) => status.current_position,
            None => service_point.ok_or_else(|| DispatchError::DroneNotFound(drone.id.clone()))?,
        };

        let path = build_emergency_path(
            emergency,
            drone,
            &start,
            delivery,
            &fleet.restricted_areas,
            force_bypass,
        )?;

        self.simulator
            .insert_emergency_for_idle(
                &drone.id,
                start,
                service_point,
                task.clone(),
                FlightSegment {
                    task_id: Some(task.id),
                    path,
                },
            )
            .await?;

        let final_cost = policy.idle;
        tracing::info!(task_id = task.id, drone_id = %drone.id, "emergency assigned to idle drone");
        Ok(EmergencyOutcome {
            assigned_drone_id: drone.id.clone(),
            final_cost,
            base_cost: 0.0,
            message: format!("emergency task {} assigned to idle drone {}", task.id, drone.id),
            success: true,
        })
    }

    /// Screen every busy candidate and keep the one with the smallest
    /// reassignment cost; the winner's interrupt cost is what gets reported
    /// as the base cost. Arithmetic anomalies get punitive defaults instead
    /// of propagating.
    fn cheapest_viable_interruption<'a>(
        &self,
        candidates: &'a [&'a Drone],
        live_tasks: &HashMap<String, Vec<DispatchTask>>,
    ) -> Option<(&'a Drone, f64)> {
        // (drone, interrupt cost, reassign cost)
        let mut best: Option<(&Drone, f64, f64)> = None;
        for drone in candidates {
            let Some(tasks) = live_tasks.get(&drone.id) else {
                continue;
            };
            match self.simulator.status(&drone.id) {
                Some(status) if status.status == DroneStatus::Moving => {}
                _ => continue,
            }

            let interrupt = match self.simulator.remaining_path_ratio(&drone.id) {
                Some(ratio) => {
                    let cost =
                        interruption_cost(ratio, drone.capability.cost_per_move, tasks.len());
                    if cost.is_finite() {
                        cost
                    } else {
                        tracing::warn!(drone_id = %drone.id, "interrupt cost was not finite, using punitive default");
                        PUNITIVE_COST_INVALID
                    }
                }
                None => {
                    tracing::warn!(drone_id = %drone.id, "interrupt cost computation failed, using punitive default");
                    PUNITIVE_COST_FAILURE
                }
            };

            let reassign = reassignment_cost(interrupt);
            if !is_viable(interrupt, reassign) {
                continue;
            }
            if best.map_or(true, |(_, _, cost)| reassign < cost) {
                best = Some((*drone, interrupt, reassign));
            }
        }
        best.map(|(drone, interrupt, _)| (drone, interrupt))
    }
}

/// Capability and capacity cover the emergency, and the drone appears in the
/// availability roster with at least one window. The emergency's own time is
/// deliberately not matched against the windows.
fn candidate_drones<'a>(emergency: &EmergencyTask, fleet: &'a FleetSnapshot) -> Vec<&'a Drone> {
    let req = &emergency.task.requirements;
    fleet
        .drones
        .iter()
        .filter(|drone| {
            (!req.cooling || drone.capability.cooling)
                && (!req.heating || drone.capability.heating)
                && req.capacity <= drone.capability.capacity
        })
        .filter(|drone| meddrone_core::optimizer::has_any_availability(&drone.id, &fleet.roster))
        .collect()
}

/// Plan the emergency flight. Bypass skips the planner entirely, so a
/// bypassed dispatch can never report a blockage.
fn build_emergency_path(
    emergency: &EmergencyTask,
    drone: &Drone,
    start: &Position,
    goal: &Position,
    restricted_areas: &[RestrictedArea],
    force_bypass: bool,
) -> Result<Vec<Position>, DispatchError> {
    if force_bypass || emergency.bypass_authorized() {
        return Ok(direct_path(start, goal));
    }

    let path = find_path(start, goal, restricted_areas, drone);
    let reaches_goal = path
        .last()
        .is_some_and(|last| distance(last, goal) < STEP_LENGTH);
    if path.is_empty() || !reaches_goal {
        return Err(DispatchError::RestrictedAreaBlocked {
            task_id: emergency.task.id,
            area_name: blocking_area_name(start, goal, restricted_areas),
            requires_confirmation: emergency.requires_confirmation(),
        });
    }
    Ok(path)
}

/// Name the area obstructing the straight line start→goal, by intersection
/// or endpoint containment.
fn blocking_area_name(start: &Position, goal: &Position, areas: &[RestrictedArea]) -> String {
    for area in areas {
        if point_in_polygon(start, &area.vertices)
            || point_in_polygon(goal, &area.vertices)
            || segment_crosses_polygon(start, goal, &area.vertices)
        {
            return area.name.clone();
        }
    }
    "Unknown restricted area".to_string()
}
