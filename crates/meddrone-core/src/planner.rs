//! Obstacle-avoiding path planner.
//!
//! Best-first search over the 16-heading move grid. The heuristic
//! deliberately overestimates (it folds in an obstacle buffer, an
//! encouragement weight and the drone's per-move cost), trading optimality
//! for speed and for favoring cheaper drones. When the search gives up, a
//! straight-line interpolation fallback takes over.

use crate::models::{Drone, Position, RestrictedArea};
use crate::spatial::{
    distance, is_close, move_towards, point_in_polygon, segment_crosses_polygon, HEADINGS,
    STEP_LENGTH,
};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

const OBSTACLE_BUFFER: f64 = 1.25;
const ENCOURAGEMENT_WEIGHT: f64 = 1.1;

/// Expansion cap before the search falls through to the straight-line
/// fallback. Keeps pathological goal placements from pinning a request.
const MAX_EXPANSIONS: usize = 20_000;

/// Quantization scale for position keys: one unit is a micro-degree,
/// far below the step length, so distinct grid states stay distinct.
const KEY_SCALE: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PosKey {
    lng: i64,
    lat: i64,
}

impl PosKey {
    fn of(position: &Position) -> Self {
        Self {
            lng: (position.lng * KEY_SCALE).round() as i64,
            lat: (position.lat * KEY_SCALE).round() as i64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FloatOrd(f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenNode {
    key: PosKey,
    position: Position,
    g_score: FloatOrd,
    f_score: FloatOrd,
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.g_score == other.g_score && self.f_score == other.f_score
    }
}

impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f_score
            .cmp(&other.f_score)
            .then_with(|| self.g_score.cmp(&other.g_score))
            .then_with(|| self.key.lng.cmp(&other.key.lng))
            .then_with(|| self.key.lat.cmp(&other.key.lat))
    }
}

/// Find an obstacle-avoiding path from `start` to `goal`.
///
/// Returns the ordered waypoints, beginning at `start` and ending within one
/// step length of `goal`. An empty result means the goal is unreachable; it
/// is never an error in this static-planning path.
pub fn find_path(
    start: &Position,
    goal: &Position,
    restricted_areas: &[RestrictedArea],
    drone: &Drone,
) -> Vec<Position> {
    for area in restricted_areas {
        if point_in_polygon(start, &area.vertices) || point_in_polygon(goal, &area.vertices) {
            return Vec::new();
        }
    }

    if is_close(start, goal) {
        return vec![*start];
    }

    let mut open_set: BinaryHeap<Reverse<OpenNode>> = BinaryHeap::new();
    let mut g_score: HashMap<PosKey, f64> = HashMap::new();
    let mut came_from: HashMap<PosKey, PosKey> = HashMap::new();
    let mut positions: HashMap<PosKey, Position> = HashMap::new();

    let start_key = PosKey::of(start);
    g_score.insert(start_key, 0.0);
    positions.insert(start_key, *start);
    open_set.push(Reverse(OpenNode {
        key: start_key,
        position: *start,
        g_score: FloatOrd(0.0),
        f_score: FloatOrd(heuristic(start, goal, drone)),
    }));

    let mut expansions = 0usize;

    while let Some(Reverse(current)) = open_set.pop() {
        let best_g = g_score.get(&current.key).copied().unwrap_or(f64::INFINITY);
        if current.g_score.0 > best_g + 1e-12 {
            continue;
        }

        if distance(&current.position, goal) < STEP_LENGTH {
            let mut path = reconstruct(&came_from, &positions, current.key);
            if let Some(first) = path.first() {
                if !is_close(first, start) {
                    path.insert(0, *start);
                }
            }
            return path;
        }

        expansions += 1;
        if expansions > MAX_EXPANSIONS {
            break;
        }

        for heading in HEADINGS {
            let neighbor = move_towards(&current.position, heading);
            if !is_move_safe(&current.position, &neighbor, restricted_areas) {
                continue;
            }

            let neighbor_key = PosKey::of(&neighbor);
            let tentative_g = best_g + distance(&current.position, &neighbor);
            if tentative_g < g_score.get(&neighbor_key).copied().unwrap_or(f64::INFINITY) {
                g_score.insert(neighbor_key, tentative_g);
                came_from.insert(neighbor_key, current.key);
                positions.insert(neighbor_key, neighbor);
                open_set.push(Reverse(OpenNode {
                    key: neighbor_key,
                    position: neighbor,
                    g_score: FloatOrd(tentative_g),
                    f_score: FloatOrd(tentative_g + heuristic(&neighbor, goal, drone)),
                }));
            }
        }
    }

    let mut safe_path = straight_path(start, goal, restricted_areas);
    if let Some(first) = safe_path.first() {
        if !is_close(first, start) {
            safe_path.insert(0, *start);
        }
    }
    if let Some(last) = safe_path.last() {
        if !is_close(last, goal) {
            return Vec::new();
        }
    }
    safe_path
}

/// Straight-line interpolated path ignoring restricted areas entirely.
/// Used for bypass-authorized emergency flights.
pub fn direct_path(start: &Position, goal: &Position) -> Vec<Position> {
    let mut path = vec![*start];
    let steps = ((distance(start, goal) / STEP_LENGTH).ceil() as usize).max(2);
    for i in 1..=steps {
        let ratio = i as f64 / steps as f64;
        path.push(Position {
            lng: start.lng + (goal.lng - start.lng) * ratio,
            lat: start.lat + (goal.lat - start.lat) * ratio,
        });
    }
    // The last interpolation step usually lands exactly on the goal; only
    // append it when rounding left the endpoint short.
    if path.last() != Some(goal) {
        path.push(*goal);
    }
    path
}

fn heuristic(from: &Position, to: &Position, drone: &Drone) -> f64 {
    let exact_moves = distance(from, to) / STEP_LENGTH;
    exact_moves * OBSTACLE_BUFFER * ENCOURAGEMENT_WEIGHT * drone.capability.cost_per_move
}

fn is_move_safe(from: &Position, to: &Position, restricted_areas: &[RestrictedArea]) -> bool {
    for area in restricted_areas {
        if point_in_polygon(from, &area.vertices) || point_in_polygon(to, &area.vertices) {
            return false;
        }
    }
    for area in restricted_areas {
        if segment_crosses_polygon(from, to, &area.vertices) {
            return false;
        }
    }
    true
}

fn reconstruct(
    came_from: &HashMap<PosKey, PosKey>,
    positions: &HashMap<PosKey, Position>,
    end: PosKey,
) -> Vec<Position> {
    let mut path = Vec::new();
    let mut current = Some(end);
    while let Some(key) = current {
        if let Some(position) = positions.get(&key) {
            path.push(*position);
        }
        current = came_from.get(&key).copied();
    }
    path.reverse();
    path
}

/// Step along the direct line from `start` to `goal`, keeping the prefix of
/// points that remain legal, then force-append the goal.
fn straight_path(start: &Position, goal: &Position, restricted_areas: &[RestrictedArea]) -> Vec<Position> {
    let mut path = vec![*start];
    let steps = ((distance(start, goal) / STEP_LENGTH).ceil() as usize).max(1);
    let mut last_safe = *start;

    for i in 1..=steps {
        let ratio = i as f64 / steps as f64;
        let candidate = Position {
            lng: start.lng + (goal.lng - start.lng) * ratio,
            lat: start.lat + (goal.lat - start.lat) * ratio,
        };
        if is_move_safe(&last_safe, &candidate, restricted_areas) {
            path.push(candidate);
            last_safe = candidate;
        } else {
            break;
        }
    }

    if path.last().map(|last| last != goal).unwrap_or(true) {
        path.push(*goal);
    }
    path
}
