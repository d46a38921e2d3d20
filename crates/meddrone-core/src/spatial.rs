//! Geometry primitives for dispatch planning.
//!
//! All coordinates are raw lng/lat degrees; distances are Euclidean on those
//! units, not geodesic. That matches the scale the dispatch engine operates
//! at (city-sized delivery areas, step lengths of fractions of a degree).

use crate::models::Position;

/// Fixed step length of one drone move, in coordinate units.
pub const STEP_LENGTH: f64 = 0.00015;

/// Per-axis tolerance for treating two positions as the same point.
pub const CLOSE_TOLERANCE: f64 = 0.00001;

/// The 16 candidate headings a drone may move along, in degrees.
pub const HEADINGS: [f64; 16] = [
    0.0, 22.5, 45.0, 67.5, 90.0, 112.5, 135.0, 157.5, 180.0, 202.5, 225.0, 247.5, 270.0, 292.5,
    315.0, 337.5,
];

/// Euclidean distance between two positions.
pub fn distance(a: &Position, b: &Position) -> f64 {
    let dlng = a.lng - b.lng;
    let dlat = a.lat - b.lat;
    (dlng * dlng + dlat * dlat).sqrt()
}

/// Position reached by moving one step from `start` along `heading_deg`.
///
/// Heading 0 points along +lng and 90 along +lat.
pub fn move_towards(start: &Position, heading_deg: f64) -> Position {
    let radians = heading_deg.to_radians();
    Position {
        lng: start.lng + STEP_LENGTH * radians.cos(),
        lat: start.lat + STEP_LENGTH * radians.sin(),
    }
}

/// Whether two positions coincide within [`CLOSE_TOLERANCE`] on each axis.
pub fn is_close(a: &Position, b: &Position) -> bool {
    (a.lng - b.lng).abs() < CLOSE_TOLERANCE && (a.lat - b.lat).abs() < CLOSE_TOLERANCE
}

/// Boundary-inclusive ray-casting point-in-polygon test.
///
/// A point exactly on an edge counts as inside. The ring may or may not
/// repeat its first vertex as the last; both forms are handled because the
/// closing edge is walked implicitly (the duplicated edge degenerates to a
/// zero-length segment, which the ray cast ignores).
pub fn point_in_polygon(point: &Position, ring: &[Position]) -> bool {
    if ring.len() < 3 {
        return false;
    }

    let n = ring.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = &ring[i];
        let vj = &ring[j];

        if point_on_segment(point, vi, vj) {
            return true;
        }

        if (vi.lat > point.lat) != (vj.lat > point.lat) {
            let slope = (vj.lng - vi.lng) / (vj.lat - vi.lat);
            let x_intersect = vi.lng + (point.lat - vi.lat) * slope;
            if point.lng < x_intersect {
                inside = !inside;
            }
        }

        j = i;
    }
    inside
}

fn point_on_segment(p: &Position, a: &Position, b: &Position) -> bool {
    let within_lng = a.lng.min(b.lng) - 1e-9 <= p.lng && p.lng <= a.lng.max(b.lng) + 1e-9;
    let within_lat = a.lat.min(b.lat) - 1e-9 <= p.lat && p.lat <= a.lat.max(b.lat) + 1e-9;
    if !within_lng || !within_lat {
        return false;
    }
    let cross = (p.lng - a.lng) * (b.lat - a.lat) - (p.lat - a.lat) * (b.lng - a.lng);
    cross.abs() < 1e-9
}

/// Whether the segment `p1`-`p2` crosses any edge of the polygon ring.
pub fn segment_crosses_polygon(p1: &Position, p2: &Position, ring: &[Position]) -> bool {
    let n = ring.len();
    for i in 0..n {
        let a = &ring[i];
        let b = &ring[(i + 1) % n];
        if segments_intersect(p1, p2, a, b) {
            return true;
        }
    }
    false
}

/// Whether two line segments intersect, including collinear touches.
pub fn segments_intersect(p1: &Position, p2: &Position, q1: &Position, q2: &Position) -> bool {
    let o1 = orientation(p1, p2, q1);
    let o2 = orientation(p1, p2, q2);
    let o3 = orientation(q1, q2, p1);
    let o4 = orientation(q1, q2, p2);

    if o1 != o2 && o3 != o4 {
        return true;
    }
    if o1 == 0 && in_bounding_box(p1, q1, p2) {
        return true;
    }
    if o2 == 0 && in_bounding_box(p1, q2, p2) {
        return true;
    }
    if o3 == 0 && in_bounding_box(q1, p1, q2) {
        return true;
    }
    if o4 == 0 && in_bounding_box(q1, p2, q2) {
        return true;
    }
    false
}

fn orientation(p: &Position, q: &Position, r: &Position) -> i8 {
    let val = (q.lat - p.lat) * (r.lng - q.lng) - (q.lng - p.lng) * (r.lat - q.lat);
    if val == 0.0 {
        0
    } else if val > 0.0 {
        1
    } else {
        2
    }
}

fn in_bounding_box(p: &Position, q: &Position, r: &Position) -> bool {
    q.lng <= p.lng.max(r.lng)
        && q.lng >= p.lng.min(r.lng)
        && q.lat <= p.lat.max(r.lat)
        && q.lat >= p.lat.min(r.lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(lng: f64, lat: f64) -> Position {
        Position { lng, lat }
    }

    fn unit_square() -> Vec<Position> {
        vec![pos(0.0, 0.0), pos(1.0, 0.0), pos(1.0, 1.0), pos(0.0, 1.0)]
    }

    #[test]
    fn distance_is_euclidean() {
        let d = distance(&pos(0.0, 0.0), &pos(3.0, 4.0));
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn move_towards_covers_one_step() {
        let start = pos(-3.186, 55.944);
        for heading in HEADINGS {
            let next = move_towards(&start, heading);
            let d = distance(&start, &next);
            assert!((d - STEP_LENGTH).abs() < 1e-12, "heading {heading}: {d}");
        }
    }

    #[test]
    fn point_in_polygon_interior_and_exterior() {
        let square = unit_square();
        assert!(point_in_polygon(&pos(0.5, 0.5), &square));
        assert!(!point_in_polygon(&pos(1.5, 0.5), &square));
    }

    #[test]
    fn point_on_edge_counts_as_inside() {
        let square = unit_square();
        assert!(point_in_polygon(&pos(0.5, 0.0), &square));
        assert!(point_in_polygon(&pos(0.0, 0.5), &square));
        assert!(point_in_polygon(&pos(1.0, 1.0), &square));
    }

    #[test]
    fn closed_ring_gives_same_answer_as_open_ring() {
        let open = unit_square();
        let mut closed = unit_square();
        closed.push(closed[0]);

        for candidate in [pos(0.5, 0.5), pos(1.5, 0.5), pos(0.0, 0.5)] {
            assert_eq!(
                point_in_polygon(&candidate, &open),
                point_in_polygon(&candidate, &closed),
            );
        }
    }

    #[test]
    fn crossing_segment_detected() {
        let square = unit_square();
        assert!(segment_crosses_polygon(
            &pos(-0.5, 0.5),
            &pos(1.5, 0.5),
            &square
        ));
        assert!(!segment_crosses_polygon(
            &pos(-0.5, -0.5),
            &pos(-0.5, 1.5),
            &square
        ));
    }

    #[test]
    fn is_close_respects_per_axis_tolerance() {
        let a = pos(0.0, 0.0);
        assert!(is_close(&a, &pos(0.000009, 0.000009)));
        assert!(!is_close(&a, &pos(0.000011, 0.0)));
    }
}
