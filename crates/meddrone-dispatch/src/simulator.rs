//! Real-time dispatch simulator.
//!
//! Owns one runtime state per live drone and advances every drone one
//! waypoint per tick. Runtime entries live in a DashMap so the tick loop and
//! emergency insertion lock individual drones, never the whole set;
//! structural changes (start/stop/add) go through one control mutex. The
//! tick loop is a single spawned task, so ticks can never overlap.

use crate::registry::FleetSnapshot;
use dashmap::DashMap;
use meddrone_core::error::DispatchError;
use meddrone_core::models::{
    DeliveryPlan, DispatchTask, Drone, DronePlan, FlightSegment, Position,
};
use meddrone_core::optimizer::estimate_cost_from_point;
use meddrone_core::spatial::{distance, STEP_LENGTH};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

const TICK_PERIOD_MS: u64 = 200;
const STOP_GRACE: Duration = Duration::from_secs(1);
/// Upper bound on consecutive empty segments walked past in one tick.
const MAX_SEGMENT_SKIPS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DroneStatus {
    Ready,
    Moving,
    Completed,
}

/// Live state of one drone. Mutated only by the tick loop and by emergency
/// insertion, both through the owning DashMap entry.
#[derive(Debug, Clone)]
pub struct DroneRuntime {
    pub drone_id: String,
    pub segments: Vec<FlightSegment>,
    pub segment_idx: usize,
    pub waypoint_idx: usize,
    pub position: Position,
    pub status: DroneStatus,
    pub tasks: Vec<DispatchTask>,
    pub is_processing_emergency: bool,
    pub current_emergency_task_id: Option<i64>,
    current_emergency_task: Option<DispatchTask>,
    interrupted_segments: Vec<FlightSegment>,
    interrupted_segment_idx: usize,
    interrupted_waypoint_idx: usize,
    emergency_queue: VecDeque<(DispatchTask, FlightSegment)>,
    service_point: Option<Position>,
}

impl DroneRuntime {
    fn from_plan(
        plan: &DronePlan,
        tasks: &[DispatchTask],
        service_point: Option<Position>,
    ) -> Option<Self> {
        let first_point = plan.segments.iter().find_map(|s| s.path.first()).copied();
        let position = first_point.or(service_point)?;
        let assigned: Vec<DispatchTask> = plan
            .segments
            .iter()
            .filter_map(|s| s.task_id)
            .filter_map(|id| tasks.iter().find(|t| t.id == id).cloned())
            .collect();

        Some(Self {
            drone_id: plan.drone_id.clone(),
            segments: plan.segments.clone(),
            segment_idx: 0,
            waypoint_idx: 0,
            position,
            status: DroneStatus::Ready,
            tasks: assigned,
            is_processing_emergency: false,
            current_emergency_task_id: None,
            current_emergency_task: None,
            interrupted_segments: Vec::new(),
            interrupted_segment_idx: 0,
            interrupted_waypoint_idx: 0,
            emergency_queue: VecDeque::new(),
            service_point,
        })
    }

    fn idle(drone_id: &str, position: Position, service_point: Option<Position>) -> Self {
        Self {
            drone_id: drone_id.to_string(),
            segments: Vec::new(),
            segment_idx: 0,
            waypoint_idx: 0,
            position,
            status: DroneStatus::Ready,
            tasks: Vec::new(),
            is_processing_emergency: false,
            current_emergency_task_id: None,
            current_emergency_task: None,
            interrupted_segments: Vec::new(),
            interrupted_segment_idx: 0,
            interrupted_waypoint_idx: 0,
            emergency_queue: VecDeque::new(),
            service_point,
        }
    }

    /// Advance one waypoint along the current segment.
    fn advance(&mut self) {
        if self.status == DroneStatus::Completed {
            return;
        }

        let mut skips = 0;
        loop {
            match self.segments.get(self.segment_idx) {
                None => {
                    self.status = DroneStatus::Completed;
                    return;
                }
                Some(segment) if segment.path.is_empty() => {
                    skips += 1;
                    if skips > MAX_SEGMENT_SKIPS {
                        return;
                    }
                    self.complete_current_segment();
                    if self.status == DroneStatus::Completed {
                        return;
                    }
                }
                Some(_) => break,
            }
        }

        let segment = &self.segments[self.segment_idx];
        if self.waypoint_idx + 1 < segment.path.len() {
            self.waypoint_idx += 1;
            self.position = segment.path[self.waypoint_idx];
            self.status = DroneStatus::Moving;
        } else {
            self.complete_current_segment();
        }
    }

    fn complete_current_segment(&mut self) {
        if self.is_processing_emergency && self.segment_idx == 0 {
            self.resume_after_emergency();
            return;
        }
        self.segment_idx += 1;
        self.waypoint_idx = 0;
        if self.segment_idx >= self.segments.len() {
            self.status = DroneStatus::Completed;
        }
    }

    /// Restore the plan interrupted by the emergency at the saved resume
    /// point. An out-of-range resume point gets a synthesized return leg to
    /// the service point; the next queued emergency starts immediately.
    fn resume_after_emergency(&mut self) {
        self.segments = std::mem::take(&mut self.interrupted_segments);
        self.segment_idx = self.interrupted_segment_idx;
        self.waypoint_idx = self.interrupted_waypoint_idx;
        self.is_processing_emergency = false;
        self.current_emergency_task_id = None;
        self.current_emergency_task = None;

        if self.segment_idx >= self.segments.len() {
            match self.service_point {
                Some(sp) => {
                    self.segments.push(FlightSegment {
                        task_id: None,
                        path: vec![self.position, sp],
                    });
                    self.segment_idx = self.segments.len() - 1;
                    self.waypoint_idx = 0;
                    self.status = DroneStatus::Moving;
                }
                None => {
                    self.status = DroneStatus::Completed;
                }
            }
        } else {
            self.status = DroneStatus::Moving;
        }

        if let Some((task, segment)) = self.emergency_queue.pop_front() {
            self.splice_emergency(task, segment);
        }
    }

    /// Replace the active plan with the emergency segment followed by the
    /// remaining original segments, saving the current indices for resume.
    fn splice_emergency(&mut self, task: DispatchTask, segment: FlightSegment) {
        self.interrupted_segment_idx = self.segment_idx;
        self.interrupted_waypoint_idx = self.waypoint_idx;
        self.interrupted_segments = std::mem::take(&mut self.segments);

        let resume_from = self
            .interrupted_segment_idx
            .min(self.interrupted_segments.len());
        let mut active = Vec::with_capacity(1 + self.interrupted_segments.len() - resume_from);
        self.current_emergency_task_id = segment.task_id;
        active.push(segment);
        active.extend(self.interrupted_segments[resume_from..].iter().cloned());

        self.segments = active;
        self.segment_idx = 0;
        self.waypoint_idx = 0;
        self.status = DroneStatus::Moving;
        self.is_processing_emergency = true;
        self.current_emergency_task = Some(task);
    }

    /// Task segments fully completed; during an emergency, progress is
    /// measured against the interrupted plan.
    pub fn completed_task_count(&self) -> usize {
        let (segments, idx) = if self.is_processing_emergency {
            (&self.interrupted_segments, self.interrupted_segment_idx)
        } else {
            (&self.segments, self.segment_idx)
        };
        segments
            .iter()
            .take(idx)
            .filter(|s| s.task_id.is_some())
            .count()
    }

    pub fn current_task_id(&self) -> Option<i64> {
        if self.is_processing_emergency {
            return self.current_emergency_task_id;
        }
        self.segments
            .iter()
            .skip(self.segment_idx)
            .find_map(|s| s.task_id)
    }

    /// `1 - completed waypoints / total waypoints` over the active plan.
    pub fn remaining_path_ratio(&self) -> f64 {
        let total: usize = self.segments.iter().map(|s| s.path.len()).sum();
        if total == 0 {
            return 0.0;
        }
        let completed: usize = self
            .segments
            .iter()
            .take(self.segment_idx)
            .map(|s| s.path.len())
            .sum::<usize>()
            + self.waypoint_idx;
        1.0 - completed as f64 / total as f64
    }

    fn snapshot(&self) -> DroneStatusSnapshot {
        DroneStatusSnapshot {
            drone_id: self.drone_id.clone(),
            current_position: self.position,
            status: self.status,
            current_task_id: self.current_task_id(),
            total_task_count: self.tasks.len(),
            completed_task_count: self.completed_task_count(),
            is_processing_emergency: self.is_processing_emergency,
            current_emergency_task_id: self.current_emergency_task_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneStatusSnapshot {
    pub drone_id: String,
    pub current_position: Position,
    pub status: DroneStatus,
    pub current_task_id: Option<i64>,
    pub total_task_count: usize,
    pub completed_task_count: usize,
    pub is_processing_emergency: bool,
    pub current_emergency_task_id: Option<i64>,
}

#[derive(Default)]
struct ControlState {
    tick_task: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

pub struct DispatchSimulator {
    drones: DashMap<String, DroneRuntime>,
    control: Mutex<ControlState>,
    running: AtomicBool,
}

impl Default for DispatchSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchSimulator {
    pub fn new() -> Self {
        Self {
            drones: DashMap::new(),
            control: Mutex::new(ControlState::default()),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Replace the whole runtime set with one seeded from the plan and start
    /// the tick loop. A running simulation is stopped first.
    pub async fn start(
        self: &Arc<Self>,
        plan: &DeliveryPlan,
        tasks: &[DispatchTask],
        fleet: &FleetSnapshot,
    ) -> Result<(), DispatchError> {
        if plan.is_empty() {
            return Err(DispatchError::Validation(
                "delivery plan has no drone plans".to_string(),
            ));
        }

        self.stop().await;

        let mut control = self.control.lock().await;
        self.drones.clear();
        for drone_plan in &plan.drone_plans {
            let service_point = fleet.service_point_for(&drone_plan.drone_id);
            match DroneRuntime::from_plan(drone_plan, tasks, service_point) {
                Some(runtime) => {
                    self.drones.insert(drone_plan.drone_id.clone(), runtime);
                }
                None => {
                    tracing::warn!(drone_id = %drone_plan.drone_id, "no seed position, drone skipped");
                }
            }
        }

        tracing::info!(drones = self.drones.len(), "simulation starting");
        self.spawn_tick_loop(&mut control);
        Ok(())
    }

    /// Stop the tick loop, waiting a bounded grace period for an in-flight
    /// tick before aborting. Runtime state stays inspectable. Idempotent.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        if let Some(shutdown) = control.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(mut handle) = control.tick_task.take() {
            if timeout(STOP_GRACE, &mut handle).await.is_err() {
                tracing::warn!("tick loop exceeded stop grace period, aborting");
                handle.abort();
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Add one drone to the current runtime set. No-op when the id is
    /// already tracked.
    pub async fn add_drone(
        &self,
        plan: &DronePlan,
        tasks: &[DispatchTask],
        service_point: Option<Position>,
    ) {
        let _control = self.control.lock().await;
        if self.drones.contains_key(&plan.drone_id) {
            return;
        }
        if let Some(runtime) = DroneRuntime::from_plan(plan, tasks, service_point) {
            self.drones.insert(plan.drone_id.clone(), runtime);
        }
    }

    /// Track an idle drone (empty plan) and splice the emergency into it in
    /// one step, then make sure the tick loop runs. Used when an emergency
    /// goes to a drone outside the simulation. The tick loop is started only
    /// after the splice; the empty placeholder plan must never be ticked.
    pub async fn insert_emergency_for_idle(
        self: &Arc<Self>,
        drone_id: &str,
        position: Position,
        service_point: Option<Position>,
        task: DispatchTask,
        segment: FlightSegment,
    ) -> Result<(), DispatchError> {
        validate_emergency_segment(&segment)?;
        let mut control = self.control.lock().await;
        self.drones
            .entry(drone_id.to_string())
            .or_insert_with(|| DroneRuntime::idle(drone_id, position, service_point));
        self.splice_or_queue(drone_id, task, segment)?;
        if !self.is_running() {
            tracing::info!(%drone_id, "starting simulation for idle emergency drone");
            self.spawn_tick_loop(&mut control);
        }
        Ok(())
    }

    fn spawn_tick_loop(self: &Arc<Self>, control: &mut ControlState) {
        let (tx, rx) = watch::channel(false);
        control.shutdown = Some(tx);
        self.running.store(true, Ordering::SeqCst);
        control.tick_task = Some(tokio::spawn(run_tick_loop(Arc::clone(self), rx)));
    }

    /// Splice an emergency into a tracked drone's plan. A drone already on
    /// an emergency queues the new one instead of being interrupted again.
    /// Synchronous: a status read after return sees the emergency.
    pub fn insert_emergency(
        &self,
        drone_id: &str,
        task: DispatchTask,
        segment: FlightSegment,
    ) -> Result<(), DispatchError> {
        validate_emergency_segment(&segment)?;
        self.splice_or_queue(drone_id, task, segment)
    }

    fn splice_or_queue(
        &self,
        drone_id: &str,
        task: DispatchTask,
        segment: FlightSegment,
    ) -> Result<(), DispatchError> {
        let Some(mut entry) = self.drones.get_mut(drone_id) else {
            return Err(DispatchError::DroneNotFound(drone_id.to_string()));
        };
        let runtime = entry.value_mut();
        if runtime.is_processing_emergency {
            tracing::info!(%drone_id, task_id = ?segment.task_id, "drone busy with emergency, queueing");
            runtime.emergency_queue.push_back((task, segment));
        } else {
            tracing::info!(%drone_id, task_id = ?segment.task_id, "interrupting drone for emergency");
            runtime.splice_emergency(task, segment);
        }
        Ok(())
    }

    pub fn status(&self, drone_id: &str) -> Option<DroneStatusSnapshot> {
        self.drones.get(drone_id).map(|entry| entry.snapshot())
    }

    pub fn status_all(&self) -> Vec<DroneStatusSnapshot> {
        self.drones.iter().map(|entry| entry.snapshot()).collect()
    }

    pub fn remaining_path_ratio(&self, drone_id: &str) -> Option<f64> {
        self.drones
            .get(drone_id)
            .map(|entry| entry.remaining_path_ratio())
    }

    /// Remaining tasks per non-completed drone, keyed by drone id, with an
    /// in-flight emergency task prepended as the current one.
    pub fn ongoing_tasks(&self) -> HashMap<String, Vec<DispatchTask>> {
        let mut live = HashMap::new();
        for entry in self.drones.iter() {
            let runtime = entry.value();
            if runtime.status == DroneStatus::Completed {
                continue;
            }
            let done = runtime.completed_task_count().min(runtime.tasks.len());
            let mut tasks: Vec<DispatchTask> = runtime.tasks[done..].to_vec();
            if let Some(task) = &runtime.current_emergency_task {
                tasks.insert(0, task.clone());
            }
            live.insert(runtime.drone_id.clone(), tasks);
        }
        live
    }

    /// Wasted progress plus the cost of still finishing the remaining tasks
    /// and returning, from the drone's live position. Zero when the drone is
    /// not currently moving.
    pub fn estimate_interrupt_cost(
        &self,
        drone: &Drone,
        service_point: &Position,
        locations: &HashMap<i64, Position>,
    ) -> f64 {
        let Some(runtime) = self.drones.get(&drone.id) else {
            return 0.0;
        };
        if runtime.status != DroneStatus::Moving {
            return 0.0;
        }

        let wasted_moves = (distance(service_point, &runtime.position) / STEP_LENGTH).ceil();
        let wasted = wasted_moves * drone.capability.cost_per_move;

        let done = runtime.completed_task_count().min(runtime.tasks.len());
        let remaining = &runtime.tasks[done..];
        wasted
            + estimate_cost_from_point(
                drone,
                remaining,
                &runtime.position,
                service_point,
                locations,
            )
    }
}

fn validate_emergency_segment(segment: &FlightSegment) -> Result<(), DispatchError> {
    if segment.task_id.is_none() {
        return Err(DispatchError::Validation(
            "emergency segment is missing its task id".to_string(),
        ));
    }
    if segment.path.is_empty() {
        return Err(DispatchError::Validation(
            "emergency segment has an empty path".to_string(),
        ));
    }
    Ok(())
}

async fn run_tick_loop(simulator: Arc<DispatchSimulator>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_millis(TICK_PERIOD_MS));

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("simulation tick loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let mut all_completed = true;
                for mut entry in simulator.drones.iter_mut() {
                    let runtime = entry.value_mut();
                    runtime.advance();
                    if runtime.status != DroneStatus::Completed {
                        all_completed = false;
                    }
                }
                if all_completed && !simulator.drones.is_empty() {
                    tracing::info!("all drones completed, simulation stopping");
                    simulator.running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use meddrone_core::models::TaskRequirements;

    fn pos(lng: f64, lat: f64) -> Position {
        Position { lng, lat }
    }

    fn segment(task_id: Option<i64>, points: &[(f64, f64)]) -> FlightSegment {
        FlightSegment {
            task_id,
            path: points.iter().map(|&(lng, lat)| pos(lng, lat)).collect(),
        }
    }

    fn task(id: i64) -> DispatchTask {
        DispatchTask {
            id,
            date: NaiveDate::from_ymd_opt(2026, 8, 31).unwrap(),
            time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            requirements: TaskRequirements::default(),
            delivery: Some(pos(0.001, 0.0)),
        }
    }

    fn runtime_with_two_segments() -> DroneRuntime {
        let plan = DronePlan {
            drone_id: "d1".to_string(),
            segments: vec![
                segment(Some(1), &[(0.0, 0.0), (0.001, 0.0), (0.002, 0.0)]),
                segment(None, &[(0.002, 0.0), (0.0, 0.0)]),
            ],
        };
        DroneRuntime::from_plan(&plan, &[task(1)], Some(pos(0.0, 0.0))).unwrap()
    }

    #[test]
    fn advance_walks_one_waypoint_per_tick_until_completed() {
        let mut runtime = runtime_with_two_segments();
        assert_eq!(runtime.status, DroneStatus::Ready);

        runtime.advance();
        assert_eq!(runtime.status, DroneStatus::Moving);
        assert_eq!(runtime.position, pos(0.001, 0.0));

        runtime.advance();
        assert_eq!(runtime.position, pos(0.002, 0.0));

        // End of segment 0, then walk the return segment.
        runtime.advance();
        assert_eq!(runtime.segment_idx, 1);
        runtime.advance();
        assert_eq!(runtime.position, pos(0.0, 0.0));
        runtime.advance();
        assert_eq!(runtime.status, DroneStatus::Completed);

        let before = runtime.clone();
        runtime.advance();
        assert_eq!(runtime.position, before.position);
    }

    #[test]
    fn emergency_splice_prefixes_remaining_plan() {
        let mut runtime = runtime_with_two_segments();
        runtime.advance();
        let saved_segment = runtime.segment_idx;
        let saved_waypoint = runtime.waypoint_idx;

        let emergency = segment(Some(99), &[(0.001, 0.0), (0.001, 0.001)]);
        runtime.splice_emergency(task(99), emergency);

        assert_eq!(runtime.status, DroneStatus::Moving);
        assert!(runtime.is_processing_emergency);
        assert_eq!(runtime.current_emergency_task_id, Some(99));
        assert_eq!(runtime.current_task_id(), Some(99));
        assert_eq!(runtime.segments[0].task_id, Some(99));
        // Remaining original segments follow in order.
        assert_eq!(runtime.segments[1].task_id, Some(1));
        assert_eq!(runtime.segments[2].task_id, None);
        assert_eq!(runtime.interrupted_segment_idx, saved_segment);
        assert_eq!(runtime.interrupted_waypoint_idx, saved_waypoint);
    }

    #[test]
    fn emergency_completion_restores_saved_resume_point() {
        let mut runtime = runtime_with_two_segments();
        runtime.advance();
        let saved_segment = runtime.segment_idx;
        let saved_waypoint = runtime.waypoint_idx;

        let emergency = segment(Some(99), &[(0.001, 0.0), (0.001, 0.001)]);
        runtime.splice_emergency(task(99), emergency);

        // One tick to the emergency delivery, one to finish its segment.
        runtime.advance();
        runtime.advance();

        assert!(!runtime.is_processing_emergency);
        assert_eq!(runtime.current_emergency_task_id, None);
        assert_eq!(runtime.segment_idx, saved_segment);
        assert_eq!(runtime.waypoint_idx, saved_waypoint);
        assert_eq!(runtime.status, DroneStatus::Moving);
        assert_eq!(runtime.segments[0].task_id, Some(1));
    }

    #[test]
    fn queued_emergency_starts_right_after_the_first_resumes() {
        let mut runtime = runtime_with_two_segments();
        runtime.advance();

        runtime.splice_emergency(task(99), segment(Some(99), &[(0.001, 0.0), (0.001, 0.001)]));
        runtime
            .emergency_queue
            .push_back((task(100), segment(Some(100), &[(0.001, 0.001), (0.002, 0.001)])));

        runtime.advance();
        runtime.advance();

        assert!(runtime.is_processing_emergency);
        assert_eq!(runtime.current_emergency_task_id, Some(100));
    }

    #[test]
    fn out_of_range_resume_point_synthesizes_return_leg() {
        let plan = DronePlan {
            drone_id: "d1".to_string(),
            segments: vec![segment(Some(1), &[(0.0, 0.0), (0.001, 0.0)])],
        };
        let mut runtime = DroneRuntime::from_plan(&plan, &[task(1)], Some(pos(0.0, 0.0))).unwrap();

        // Walk to the end of the only segment; resume point is past the plan.
        runtime.advance();
        runtime.segment_idx = runtime.segments.len();
        runtime.splice_emergency(task(99), segment(Some(99), &[(0.001, 0.0), (0.001, 0.001)]));

        runtime.advance();
        runtime.advance();

        assert!(!runtime.is_processing_emergency);
        assert_eq!(runtime.status, DroneStatus::Moving);
        let return_leg = runtime.segments.last().unwrap();
        assert_eq!(return_leg.task_id, None);
        assert_eq!(return_leg.path.last(), Some(&pos(0.0, 0.0)));
    }

    #[test]
    fn remaining_path_ratio_counts_waypoints() {
        let mut runtime = runtime_with_two_segments();
        // 5 waypoints total across both segments.
        assert!((runtime.remaining_path_ratio() - 1.0).abs() < 1e-9);
        runtime.advance();
        assert!((runtime.remaining_path_ratio() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn empty_segments_are_skipped_within_one_tick() {
        let plan = DronePlan {
            drone_id: "d1".to_string(),
            segments: vec![
                segment(Some(1), &[]),
                segment(None, &[]),
                segment(Some(2), &[(0.0, 0.0), (0.001, 0.0)]),
            ],
        };
        let mut runtime = DroneRuntime::from_plan(&plan, &[task(2)], Some(pos(0.0, 0.0))).unwrap();

        runtime.advance();
        assert_eq!(runtime.segment_idx, 2);
        assert_eq!(runtime.position, pos(0.001, 0.0));
        assert_eq!(runtime.status, DroneStatus::Moving);
    }
}
