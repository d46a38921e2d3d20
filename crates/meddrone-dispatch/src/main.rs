//! Medical drone dispatch demo.
//!
//! Builds a small static fleet, plans a task batch, runs the simulation and
//! injects an emergency mid-flight.

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime};
use meddrone_core::models::{
    AvailabilitySlot, DispatchTask, Drone, DroneAvailability, DroneCapability, EmergencyTask,
    Position, ServicePoint, ServicePointDrones, TaskRequirements,
};
use meddrone_core::optimizer;
use meddrone_dispatch::emergency::EmergencyDispatcher;
use meddrone_dispatch::registry::{FleetSnapshot, StaticDirectory};
use meddrone_dispatch::simulator::DispatchSimulator;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("meddrone_dispatch=debug".parse()?),
        )
        .init();

    let directory = demo_directory();
    let fleet = FleetSnapshot::from_directory(&directory);
    let tasks = demo_tasks();

    let plan = optimizer::optimize(&fleet.drones, &tasks, &fleet.context())?;
    tracing::info!(
        drones = plan.drone_plans.len(),
        total_cost = plan.total_cost,
        total_moves = plan.total_moves,
        "batch planned"
    );

    let simulator = Arc::new(DispatchSimulator::new());
    simulator.start(&plan, &tasks, &fleet).await?;

    tokio::time::sleep(Duration::from_secs(1)).await;

    let dispatcher = EmergencyDispatcher::new(Arc::clone(&simulator));
    let emergency = demo_emergency();
    let live_tasks = simulator.ongoing_tasks();
    match dispatcher.dispatch(&emergency, &fleet, &live_tasks).await {
        Ok(outcome) => tracing::info!(
            drone_id = %outcome.assigned_drone_id,
            final_cost = outcome.final_cost,
            "{}",
            outcome.message
        ),
        Err(err) => tracing::warn!("emergency dispatch failed: {err}"),
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    for status in simulator.status_all() {
        tracing::info!(
            drone_id = %status.drone_id,
            status = ?status.status,
            completed = status.completed_task_count,
            total = status.total_task_count,
            emergency = status.is_processing_emergency,
            "drone status"
        );
    }

    simulator.stop().await;
    Ok(())
}

fn demo_directory() -> StaticDirectory {
    let capability = |cooling, heating| DroneCapability {
        capacity: 12.0,
        cooling,
        heating,
        max_moves: 5000,
        cost_per_move: 0.05,
        cost_initial: 2.0,
        cost_final: 1.0,
    };
    StaticDirectory {
        drones: vec![
            Drone {
                id: "med-01".to_string(),
                name: "Courier 1".to_string(),
                capability: capability(true, false),
            },
            Drone {
                id: "med-02".to_string(),
                name: "Courier 2".to_string(),
                capability: capability(false, false),
            },
        ],
        service_points: vec![ServicePoint {
            id: 1,
            name: "Central Pharmacy".to_string(),
            location: Position { lng: -3.1869, lat: 55.9445 },
        }],
        availability: vec![ServicePointDrones {
            service_point_id: 1,
            drones: ["med-01", "med-02"]
                .iter()
                .map(|id| DroneAvailability {
                    id: id.to_string(),
                    availability: all_week(),
                })
                .collect(),
        }],
        restricted_areas: Vec::new(),
    }
}

fn all_week() -> Vec<AvailabilitySlot> {
    [
        "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
    ]
    .iter()
    .map(|day| AvailabilitySlot {
        day_of_week: day.to_string(),
        from: "00:00".to_string(),
        until: "23:59".to_string(),
    })
    .collect()
}

fn demo_tasks() -> Vec<DispatchTask> {
    let task = |id, lng, lat, cooling| DispatchTask {
        id,
        date: NaiveDate::from_ymd_opt(2026, 8, 31).unwrap_or_default(),
        time: NaiveTime::from_hms_opt(10, 30, 0).unwrap_or_default(),
        requirements: TaskRequirements {
            capacity: 3.0,
            cooling,
            heating: false,
            max_cost: 0.0,
        },
        delivery: Some(Position { lng, lat }),
    };
    vec![
        task(1, -3.1889, 55.9455, true),
        task(2, -3.1850, 55.9460, false),
    ]
}

fn demo_emergency() -> EmergencyTask {
    EmergencyTask {
        task: DispatchTask {
            id: 100,
            date: NaiveDate::from_ymd_opt(2026, 8, 31).unwrap_or_default(),
            time: NaiveTime::from_hms_opt(10, 45, 0).unwrap_or_default(),
            requirements: TaskRequirements {
                capacity: 2.0,
                cooling: false,
                heating: false,
                max_cost: 0.0,
            },
            delivery: Some(Position { lng: -3.1840, lat: 55.9430 }),
        },
        emergency_level: 3,
    }
}
