//! Batch task assignment.
//!
//! Three phases: filter drones down to those that can take at least one
//! task, assign tasks greedily in composite-priority order, then build each
//! drone's flight plan leg by leg through the planner. A single-drone
//! solution is computed alongside the multi-drone split and the cheaper of
//! the two wins.

use crate::error::DispatchError;
use crate::models::{
    DeliveryPlan, DispatchTask, Drone, DronePlan, FlightSegment, Position, RestrictedArea,
    ServicePoint, ServicePointDrones,
};
use crate::planner::find_path;
use crate::spatial::{distance, is_close, STEP_LENGTH};
use chrono::{NaiveDate, NaiveTime};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Read-only fleet registry data the optimizer works against.
pub struct FleetContext<'a> {
    pub roster: &'a [ServicePointDrones],
    pub service_points: &'a [ServicePoint],
    pub restricted_areas: &'a [RestrictedArea],
}

impl FleetContext<'_> {
    /// Home service point of a drone, resolved through the roster.
    pub fn service_point_for(&self, drone_id: &str) -> Option<Position> {
        for entry in self.roster {
            for avail in &entry.drones {
                if avail.id == drone_id {
                    return self
                        .service_points
                        .iter()
                        .find(|sp| sp.id == entry.service_point_id)
                        .map(|sp| sp.location);
                }
            }
        }
        None
    }
}

/// Produce the cheapest complete plan for a task batch.
///
/// Both a single-drone-handles-everything solution and a multi-drone split
/// are computed; the lower total cost wins. A failed multi-drone assignment
/// still yields the single-drone solution when one exists.
pub fn optimize(
    drones: &[Drone],
    tasks: &[DispatchTask],
    ctx: &FleetContext<'_>,
) -> Result<DeliveryPlan, DispatchError> {
    if tasks.is_empty() {
        return Err(DispatchError::Validation("task batch is empty".to_string()));
    }
    let locations = task_locations(tasks)?;

    let single = single_drone_plan(drones, tasks, &locations, ctx)?;
    match multi_drone_plan(drones, tasks, &locations, ctx) {
        Ok(multi) => Ok(select_better(single, multi)),
        Err(_) if !single.is_empty() => Ok(single),
        Err(err) => Err(err),
    }
}

/// Validate the batch and extract each task's delivery location keyed by id.
pub fn task_locations(
    tasks: &[DispatchTask],
) -> Result<HashMap<i64, Position>, DispatchError> {
    let mut locations = HashMap::new();
    for task in tasks {
        if task.requirements.cooling && task.requirements.heating {
            return Err(DispatchError::Validation(format!(
                "task {} requires both cooling and heating",
                task.id
            )));
        }
        let delivery = task.delivery.ok_or_else(|| {
            DispatchError::Validation(format!("task {} is missing delivery location", task.id))
        })?;
        locations.insert(task.id, delivery);
    }
    Ok(locations)
}

/// Basic screening: capability, capacity and date/time availability.
pub fn can_handle_task(
    drone: &Drone,
    task: &DispatchTask,
    roster: &[ServicePointDrones],
) -> bool {
    let req = &task.requirements;
    if req.cooling && !drone.capability.cooling {
        return false;
    }
    if req.heating && !drone.capability.heating {
        return false;
    }
    if req.capacity > drone.capability.capacity {
        return false;
    }
    drone_available_at(&drone.id, task.date, task.time, roster)
}

/// Screening with the round-trip move estimate and the task's cost budget
/// layered on top of [`can_handle_task`].
pub fn can_handle_task_with_moves(
    drone: &Drone,
    task: &DispatchTask,
    roster: &[ServicePointDrones],
    service_point: &Position,
    task_location: &Position,
    include_return: bool,
) -> bool {
    if !can_handle_task(drone, task, roster) {
        return false;
    }

    let distance_to_task = distance(service_point, task_location);
    let moves_to_task = (distance_to_task / STEP_LENGTH).ceil() as u32;
    let total_moves = if include_return {
        moves_to_task * 2
    } else {
        moves_to_task
    };
    if total_moves > drone.capability.max_moves {
        return false;
    }

    let max_cost = task.requirements.max_cost;
    if max_cost > 0.0 {
        let mut single_location = HashMap::new();
        single_location.insert(task.id, *task_location);
        let estimated =
            estimate_max_cost(drone, std::slice::from_ref(task), service_point, &single_location);
        if estimated > max_cost {
            return false;
        }
    }
    true
}

/// Whether the drone has a roster window covering the given date and time.
/// Both window bounds are inclusive; day names match case-insensitively.
pub fn drone_available_at(
    drone_id: &str,
    date: NaiveDate,
    time: NaiveTime,
    roster: &[ServicePointDrones],
) -> bool {
    let day_name = date.format("%A").to_string();
    for entry in roster {
        for avail in &entry.drones {
            if avail.id != drone_id {
                continue;
            }
            for slot in &avail.availability {
                if !slot.day_of_week.eq_ignore_ascii_case(&day_name) {
                    continue;
                }
                let (Some(from), Some(until)) =
                    (parse_slot_time(&slot.from), parse_slot_time(&slot.until))
                else {
                    continue;
                };
                if time >= from && time <= until {
                    return true;
                }
            }
        }
    }
    false
}

/// Whether the drone appears in the roster with any availability at all.
/// Emergency candidate selection only checks presence, not the clock.
pub fn has_any_availability(drone_id: &str, roster: &[ServicePointDrones]) -> bool {
    for entry in roster {
        for avail in &entry.drones {
            if avail.id == drone_id {
                return !avail.availability.is_empty();
            }
        }
    }
    false
}

fn parse_slot_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

/// Estimated round-trip cost for a drone serving `tasks` in order from its
/// service point: fixed cost plus straight-line moves plus one hover per
/// task and one at the final return.
pub fn estimate_max_cost(
    drone: &Drone,
    tasks: &[DispatchTask],
    service_point: &Position,
    locations: &HashMap<i64, Position>,
) -> f64 {
    if tasks.is_empty() {
        return 0.0;
    }
    let capability = &drone.capability;

    let mut total_distance = 0.0;
    let mut current = *service_point;
    for task in tasks {
        if let Some(location) = locations.get(&task.id) {
            total_distance += distance(&current, location);
            current = *location;
        }
    }
    total_distance += distance(&current, service_point);

    let flight_moves = (total_distance / STEP_LENGTH).ceil() as u32;
    let hover_moves = tasks.len() as u32 + 1;
    capability.fixed_cost() + f64::from(flight_moves + hover_moves) * capability.cost_per_move
}

/// Move cost of finishing `tasks` from an arbitrary start point and ending at
/// `end`, with one hover per task. Excludes the fixed cost, which was already
/// spent when the flight launched. Feeds the interruption-cost estimate.
pub fn estimate_cost_from_point(
    drone: &Drone,
    tasks: &[DispatchTask],
    start: &Position,
    end: &Position,
    locations: &HashMap<i64, Position>,
) -> f64 {
    if tasks.is_empty() {
        return 0.0;
    }

    let mut total_distance = 0.0;
    let mut current = *start;
    for task in tasks {
        if let Some(location) = locations.get(&task.id) {
            total_distance += distance(&current, location);
            current = *location;
        }
    }
    total_distance += distance(&current, end);

    let flight_moves = (total_distance / STEP_LENGTH).ceil() as u32;
    let hover_moves = tasks.len() as u32;
    f64::from(flight_moves + hover_moves) * drone.capability.cost_per_move
}

/// Phase 1: drones available at the time of at least one task and capable of
/// handling at least one task.
pub fn filter_capable_drones(
    drones: &[Drone],
    tasks: &[DispatchTask],
    roster: &[ServicePointDrones],
) -> Vec<Drone> {
    drones
        .iter()
        .filter(|drone| {
            tasks
                .iter()
                .any(|task| drone_available_at(&drone.id, task.date, task.time, roster))
        })
        .filter(|drone| tasks.iter().any(|task| can_handle_task(drone, task, roster)))
        .cloned()
        .collect()
}

fn temperature_match_score(drone: &Drone, tasks: &[DispatchTask]) -> i32 {
    let mut score = 0;
    for task in tasks {
        if task.requirements.cooling && drone.capability.cooling {
            score += 2;
        }
        if task.requirements.heating && drone.capability.heating {
            score += 2;
        }
    }
    score
}

/// Phase 2 ordering: temperature-capability match first, then match score,
/// capacity, fixed cost, cost per move.
pub fn prioritize_drones(mut drones: Vec<Drone>, tasks: &[DispatchTask]) -> Vec<Drone> {
    let has_cooling_tasks = tasks.iter().any(|t| t.requirements.cooling);
    let has_heating_tasks = tasks.iter().any(|t| t.requirements.heating);

    drones.sort_by(|d1, d2| {
        let mut ord = Ordering::Equal;
        if has_cooling_tasks {
            ord = d2.capability.cooling.cmp(&d1.capability.cooling);
        }
        if ord == Ordering::Equal && has_heating_tasks {
            ord = d2.capability.heating.cmp(&d1.capability.heating);
        }
        ord.then_with(|| {
            temperature_match_score(d2, tasks).cmp(&temperature_match_score(d1, tasks))
        })
        .then_with(|| d2.capability.capacity.total_cmp(&d1.capability.capacity))
        .then_with(|| d1.capability.fixed_cost().total_cmp(&d2.capability.fixed_cost()))
        .then_with(|| {
            d1.capability
                .cost_per_move
                .total_cmp(&d2.capability.cost_per_move)
        })
    });
    drones
}

/// Greedily pick the tasks a drone can feasibly take from the remaining
/// pool, within its capacity and estimated move budget.
fn assign_tasks_to_drone(
    drone: &Drone,
    remaining_tasks: &[DispatchTask],
    service_point: &Position,
    locations: &HashMap<i64, Position>,
    roster: &[ServicePointDrones],
) -> Vec<DispatchTask> {
    let mut feasible: Vec<&DispatchTask> = remaining_tasks
        .iter()
        .filter(|task| {
            locations.get(&task.id).is_some_and(|location| {
                can_handle_task_with_moves(drone, task, roster, service_point, location, true)
            })
        })
        .collect();

    if feasible.is_empty() {
        return Vec::new();
    }

    feasible.sort_by(|t1, t2| {
        let t1_temp = t1.requirements.cooling || t1.requirements.heating;
        let t2_temp = t2.requirements.cooling || t2.requirements.heating;
        t2_temp
            .cmp(&t1_temp)
            .then_with(|| t2.requirements.capacity.total_cmp(&t1.requirements.capacity))
            .then_with(|| {
                let d1 = locations
                    .get(&t1.id)
                    .map(|l| distance(service_point, l))
                    .unwrap_or(f64::INFINITY);
                let d2 = locations
                    .get(&t2.id)
                    .map(|l| distance(service_point, l))
                    .unwrap_or(f64::INFINITY);
                d1.total_cmp(&d2)
            })
    });

    let mut assigned = Vec::new();
    let mut remaining_capacity = drone.capability.capacity;
    let mut remaining_moves = drone.capability.max_moves;

    for task in feasible {
        let Some(location) = locations.get(&task.id) else {
            continue;
        };
        let estimated_moves = (distance(service_point, location) / STEP_LENGTH).ceil() as u32 * 2;
        if task.requirements.capacity <= remaining_capacity && estimated_moves <= remaining_moves {
            remaining_capacity -= task.requirements.capacity;
            remaining_moves -= estimated_moves;
            assigned.push(task.clone());
        }
    }
    assigned
}

/// Phase 3: plan one drone's assigned tasks leg by leg through the planner.
///
/// Every leg is prefixed with the current position when the planner's first
/// point differs, and closed with a hover point that costs one extra move.
/// The plan ends with a return leg to the service point (or a two-point
/// hover there). Exceeding the drone's move budget fails the build.
pub fn build_drone_plan(
    drone: &Drone,
    tasks: &[DispatchTask],
    service_point: &Position,
    locations: &HashMap<i64, Position>,
    restricted_areas: &[RestrictedArea],
) -> Result<DronePlan, DispatchError> {
    let mut segments = Vec::new();
    let mut current = *service_point;
    let mut total_moves: u32 = 0;

    for task in tasks {
        let target = *locations.get(&task.id).ok_or_else(|| {
            DispatchError::Validation(format!("location for task {} does not exist", task.id))
        })?;

        let mut flight_path = find_path(&current, &target, restricted_areas, drone);
        if let Some(first) = flight_path.first() {
            if !is_close(first, &current) {
                flight_path.insert(0, current);
            }
        }

        // One move per waypoint transition plus the hover at delivery.
        if !flight_path.is_empty() {
            total_moves += flight_path.len() as u32;
        }
        if total_moves > drone.capability.max_moves {
            return Err(DispatchError::MoveBudgetExceeded {
                drone_id: drone.id.clone(),
                moves: total_moves,
                max_moves: drone.capability.max_moves,
            });
        }

        if let Some(last) = flight_path.last().copied() {
            flight_path.push(last);
        }

        segments.push(FlightSegment {
            task_id: Some(task.id),
            path: flight_path,
        });
        current = target;
    }

    if !is_close(&current, service_point) {
        let mut return_path = find_path(&current, service_point, restricted_areas, drone);
        if let Some(first) = return_path.first() {
            if !is_close(first, &current) {
                return_path.insert(0, current);
            }
        }

        if !return_path.is_empty() {
            total_moves += return_path.len() as u32;
        }
        if total_moves > drone.capability.max_moves {
            return Err(DispatchError::MoveBudgetExceeded {
                drone_id: drone.id.clone(),
                moves: total_moves,
                max_moves: drone.capability.max_moves,
            });
        }

        if let Some(last) = return_path.last().copied() {
            return_path.push(last);
        }
        if return_path.is_empty() {
            return_path = vec![*service_point, *service_point];
        }

        // Force the final waypoint back onto the service point if the
        // planner stopped short of it.
        if let Some(last) = return_path.last() {
            if !is_close(last, service_point) {
                return_path.pop();
                return_path.push(*service_point);
                return_path.push(*service_point);
            }
        }

        segments.push(FlightSegment {
            task_id: None,
            path: return_path,
        });
    } else {
        segments.push(FlightSegment {
            task_id: None,
            path: vec![*service_point, *service_point],
        });
    }

    Ok(DronePlan {
        drone_id: drone.id.clone(),
        segments,
    })
}

/// Total cost of one drone's plan: fixed cost plus moves times per-move cost.
pub fn plan_cost(drone: &Drone, plan: &DronePlan) -> f64 {
    drone.capability.fixed_cost()
        + f64::from(plan.total_moves()) * drone.capability.cost_per_move
}

/// First capable drone that can build a complete valid plan for the whole
/// batch on its own. An empty result means no such drone exists.
pub fn single_drone_plan(
    drones: &[Drone],
    tasks: &[DispatchTask],
    locations: &HashMap<i64, Position>,
    ctx: &FleetContext<'_>,
) -> Result<DeliveryPlan, DispatchError> {
    for drone in drones {
        let Some(service_point) = ctx.service_point_for(&drone.id) else {
            continue;
        };
        let handles_any = tasks
            .iter()
            .any(|task| task.requirements.capacity <= drone.capability.capacity);
        if !handles_any {
            continue;
        }
        if !satisfies_temperature_requirements(drone, tasks) {
            continue;
        }

        match build_drone_plan(drone, tasks, &service_point, locations, ctx.restricted_areas) {
            Ok(plan) => {
                let total_cost = plan_cost(drone, &plan);
                let total_moves = plan.total_moves();
                return Ok(DeliveryPlan {
                    drone_plans: vec![plan],
                    total_cost,
                    total_moves,
                });
            }
            Err(DispatchError::MoveBudgetExceeded { .. }) => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(DeliveryPlan::default())
}

fn satisfies_temperature_requirements(drone: &Drone, tasks: &[DispatchTask]) -> bool {
    let mut has_cooling = false;
    let mut has_heating = false;
    for task in tasks {
        if task.requirements.cooling {
            has_cooling = true;
            if !drone.capability.cooling {
                return false;
            }
        }
        if task.requirements.heating {
            has_heating = true;
            if !drone.capability.heating {
                return false;
            }
        }
    }
    // A batch needing both temperatures never goes to a single drone.
    !(has_cooling && has_heating)
}

/// Full multi-drone split. Fails the whole batch when any task is left over.
pub fn multi_drone_plan(
    drones: &[Drone],
    tasks: &[DispatchTask],
    locations: &HashMap<i64, Position>,
    ctx: &FleetContext<'_>,
) -> Result<DeliveryPlan, DispatchError> {
    let suitable = filter_capable_drones(drones, tasks, ctx.roster);
    if suitable.is_empty() {
        return Ok(DeliveryPlan::default());
    }

    let prioritized = prioritize_drones(suitable, tasks);
    let mut remaining: Vec<DispatchTask> = tasks.to_vec();
    let mut assignments: Vec<(Drone, Vec<DispatchTask>, Position)> = Vec::new();

    for drone in prioritized {
        if remaining.is_empty() {
            break;
        }
        let Some(service_point) = ctx.service_point_for(&drone.id) else {
            continue;
        };
        let assigned =
            assign_tasks_to_drone(&drone, &remaining, &service_point, locations, ctx.roster);
        if !assigned.is_empty() {
            let taken: HashSet<i64> = assigned.iter().map(|t| t.id).collect();
            remaining.retain(|task| !taken.contains(&task.id));
            assignments.push((drone, assigned, service_point));
        }
    }

    if !remaining.is_empty() {
        return Err(DispatchError::UnassignableBatch {
            remaining: remaining.len(),
        });
    }
    if assignments.is_empty() {
        return Ok(DeliveryPlan::default());
    }

    let mut drone_plans = Vec::new();
    let mut total_cost = 0.0;
    let mut total_moves = 0u32;
    for (drone, assigned, service_point) in &assignments {
        let plan =
            build_drone_plan(drone, assigned, service_point, locations, ctx.restricted_areas)?;
        total_cost += plan_cost(drone, &plan);
        total_moves += plan.total_moves();
        drone_plans.push(plan);
    }

    Ok(DeliveryPlan {
        drone_plans,
        total_cost,
        total_moves,
    })
}

/// Lower total cost wins; an empty candidate loses to any non-empty one and
/// the single-drone solution wins ties.
pub fn select_better(single: DeliveryPlan, multi: DeliveryPlan) -> DeliveryPlan {
    if single.is_empty() {
        return multi;
    }
    if multi.is_empty() {
        return single;
    }
    if single.total_cost <= multi.total_cost {
        single
    } else {
        multi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AvailabilitySlot, DroneAvailability, DroneCapability, TaskRequirements};

    fn pos(lng: f64, lat: f64) -> Position {
        Position { lng, lat }
    }

    fn drone(id: &str, capacity: f64, cooling: bool, heating: bool) -> Drone {
        Drone {
            id: id.to_string(),
            name: format!("Drone {id}"),
            capability: DroneCapability {
                capacity,
                cooling,
                heating,
                max_moves: 5000,
                cost_per_move: 0.05,
                cost_initial: 2.0,
                cost_final: 1.0,
            },
        }
    }

    // 2026-08-31 is a Monday.
    fn monday_task(id: i64, capacity: f64, delivery: Position) -> DispatchTask {
        DispatchTask {
            id,
            date: NaiveDate::from_ymd_opt(2026, 8, 31).unwrap(),
            time: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            requirements: TaskRequirements {
                capacity,
                ..TaskRequirements::default()
            },
            delivery: Some(delivery),
        }
    }

    fn roster_for(drone_ids: &[&str]) -> Vec<ServicePointDrones> {
        vec![ServicePointDrones {
            service_point_id: 1,
            drones: drone_ids
                .iter()
                .map(|id| DroneAvailability {
                    id: id.to_string(),
                    availability: vec![AvailabilitySlot {
                        day_of_week: "Monday".to_string(),
                        from: "08:00".to_string(),
                        until: "18:00".to_string(),
                    }],
                })
                .collect(),
        }]
    }

    fn service_points() -> Vec<ServicePoint> {
        vec![ServicePoint {
            id: 1,
            name: "Depot".to_string(),
            location: pos(0.0, 0.0),
        }]
    }

    #[test]
    fn can_handle_task_flips_on_capacity() {
        let roster = roster_for(&["d1"]);
        let task = monday_task(1, 5.0, pos(0.001, 0.0));

        let capable = drone("d1", 10.0, false, false);
        assert!(can_handle_task(&capable, &task, &roster));

        let mut undersized = capable;
        undersized.capability.capacity = 4.0;
        assert!(!can_handle_task(&undersized, &task, &roster));
    }

    #[test]
    fn availability_window_is_inclusive_and_case_insensitive() {
        let roster = vec![ServicePointDrones {
            service_point_id: 1,
            drones: vec![DroneAvailability {
                id: "d1".to_string(),
                availability: vec![AvailabilitySlot {
                    day_of_week: "MONDAY".to_string(),
                    from: "08:00".to_string(),
                    until: "18:00".to_string(),
                }],
            }],
        }];
        let monday = NaiveDate::from_ymd_opt(2026, 8, 31).unwrap();

        let at = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert!(drone_available_at("d1", monday, at(8, 0), &roster));
        assert!(drone_available_at("d1", monday, at(18, 0), &roster));
        assert!(!drone_available_at("d1", monday, at(18, 1), &roster));

        let tuesday = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        assert!(!drone_available_at("d1", tuesday, at(10, 0), &roster));
    }

    #[test]
    fn cost_budget_screening_flips_feasibility() {
        let roster = roster_for(&["d1"]);
        let d = drone("d1", 10.0, false, false);
        let service_point = pos(0.0, 0.0);
        let location = pos(0.0015, 0.0);

        let mut task = monday_task(1, 5.0, location);
        task.requirements.max_cost = 100.0;
        assert!(can_handle_task_with_moves(
            &d,
            &task,
            &roster,
            &service_point,
            &location,
            true
        ));

        task.requirements.max_cost = 3.5;
        assert!(!can_handle_task_with_moves(
            &d,
            &task,
            &roster,
            &service_point,
            &location,
            true
        ));
    }

    #[test]
    fn drones_with_required_temperature_sort_first() {
        let tasks = vec![{
            let mut t = monday_task(1, 1.0, pos(0.001, 0.0));
            t.requirements.cooling = true;
            t
        }];
        let plain = drone("plain", 20.0, false, false);
        let chilled = drone("chilled", 5.0, true, false);

        let ordered = prioritize_drones(vec![plain, chilled], &tasks);
        assert_eq!(ordered[0].id, "chilled");
    }

    #[test]
    fn ties_fall_through_to_cheaper_fixed_cost() {
        let tasks = vec![monday_task(1, 1.0, pos(0.001, 0.0))];
        let mut pricey = drone("pricey", 10.0, false, false);
        pricey.capability.cost_initial = 9.0;
        let cheap = drone("cheap", 10.0, false, false);

        let ordered = prioritize_drones(vec![pricey, cheap], &tasks);
        assert_eq!(ordered[0].id, "cheap");
    }

    #[test]
    fn built_plan_honors_capacity_and_move_budget() {
        let drones = vec![drone("d1", 10.0, false, false), drone("d2", 10.0, false, false)];
        let roster = roster_for(&["d1", "d2"]);
        let sps = service_points();
        let ctx = FleetContext {
            roster: &roster,
            service_points: &sps,
            restricted_areas: &[],
        };
        let tasks = vec![
            monday_task(1, 4.0, pos(0.001, 0.0)),
            monday_task(2, 3.0, pos(0.0, 0.001)),
        ];

        let plan = optimize(&drones, &tasks, &ctx).unwrap();
        assert!(!plan.is_empty());

        for drone_plan in &plan.drone_plans {
            let d = drones.iter().find(|d| d.id == drone_plan.drone_id).unwrap();
            let assigned_capacity: f64 = drone_plan
                .segments
                .iter()
                .filter_map(|seg| seg.task_id)
                .map(|id| tasks.iter().find(|t| t.id == id).unwrap().requirements.capacity)
                .sum();
            assert!(assigned_capacity <= d.capability.capacity);
            assert!(drone_plan.total_moves() <= d.capability.max_moves);

            // Plan closes back at the service point.
            let last_segment = drone_plan.segments.last().unwrap();
            assert_eq!(last_segment.task_id, None);
            assert!(is_close(last_segment.path.last().unwrap(), &pos(0.0, 0.0)));
        }
    }

    #[test]
    fn hover_point_duplicates_leg_end() {
        let d = drone("d1", 10.0, false, false);
        let tasks = vec![monday_task(1, 2.0, pos(0.0009, 0.0))];
        let locations = task_locations(&tasks).unwrap();

        let plan = build_drone_plan(&d, &tasks, &pos(0.0, 0.0), &locations, &[]).unwrap();
        let delivery = &plan.segments[0];
        let n = delivery.path.len();
        assert!(n >= 2);
        assert_eq!(delivery.path[n - 1], delivery.path[n - 2]);
    }

    #[test]
    fn unassignable_batch_fails_multi_drone_split() {
        let drones = vec![drone("d1", 3.0, false, false)];
        let roster = roster_for(&["d1"]);
        let sps = service_points();
        let ctx = FleetContext {
            roster: &roster,
            service_points: &sps,
            restricted_areas: &[],
        };
        // Second task exceeds every drone's capacity.
        let tasks = vec![
            monday_task(1, 2.0, pos(0.001, 0.0)),
            monday_task(2, 8.0, pos(0.0, 0.001)),
        ];
        let locations = task_locations(&tasks).unwrap();

        let err = multi_drone_plan(&drones, &tasks, &locations, &ctx).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::UnassignableBatch { remaining: 1 }
        ));
    }

    #[test]
    fn missing_delivery_is_a_validation_error() {
        let mut task = monday_task(1, 1.0, pos(0.001, 0.0));
        task.delivery = None;
        let err = task_locations(&[task]).unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn conflicting_temperature_requirements_are_rejected() {
        let mut task = monday_task(1, 1.0, pos(0.001, 0.0));
        task.requirements.cooling = true;
        task.requirements.heating = true;
        let err = task_locations(&[task]).unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn empty_solution_loses_selection() {
        let occupied = DeliveryPlan {
            drone_plans: vec![DronePlan {
                drone_id: "d1".to_string(),
                segments: Vec::new(),
            }],
            total_cost: 42.0,
            total_moves: 10,
        };
        let chosen = select_better(DeliveryPlan::default(), occupied.clone());
        assert_eq!(chosen.total_cost, 42.0);

        let chosen = select_better(occupied.clone(), DeliveryPlan::default());
        assert_eq!(chosen.total_cost, 42.0);
    }

    #[test]
    fn single_drone_wins_cost_ties() {
        let single = DeliveryPlan {
            drone_plans: vec![DronePlan {
                drone_id: "single".to_string(),
                segments: Vec::new(),
            }],
            total_cost: 10.0,
            total_moves: 5,
        };
        let multi = DeliveryPlan {
            drone_plans: vec![DronePlan {
                drone_id: "multi".to_string(),
                segments: Vec::new(),
            }],
            total_cost: 10.0,
            total_moves: 5,
        };
        let chosen = select_better(single, multi);
        assert_eq!(chosen.drone_plans[0].drone_id, "single");
    }

    #[test]
    fn estimate_max_cost_includes_hovers_and_fixed_cost() {
        let d = drone("d1", 10.0, false, false);
        let tasks = vec![monday_task(1, 1.0, pos(0.0015, 0.0))];
        let locations = task_locations(&tasks).unwrap();

        // Round trip 0.003 -> 20 moves, plus tasks + 1 = 2 hovers.
        let cost = estimate_max_cost(&d, &tasks, &pos(0.0, 0.0), &locations);
        let expected = 3.0 + 22.0 * 0.05;
        assert!((cost - expected).abs() < 1e-9, "cost {cost}");
    }
}
