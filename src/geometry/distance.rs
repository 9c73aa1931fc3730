//! Closest-point and distance queries
//!
//! The rectangle queries rely on the rectangle's edges being orthogonal, so a
//! point can be expressed in the rectangle's basis by plain vector projection.

use glam::DVec3;

use super::Rectangle;

/// Segments whose squared cross product is below this fraction of
/// |d1|² |d2|² are treated as parallel
const PARALLEL_TOLERANCE: f64 = 1e-10;

/// Closest points between a line segment and a rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentContact {
    pub distance: f64,
    pub on_segment: DVec3,
    pub on_rectangle: DVec3,
}

/// Closest points between two line segments
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPair {
    pub distance: f64,
    pub point1: DVec3,
    pub point2: DVec3,
}

/// Parametric coordinates (a, b) of the projection of `point` onto the plane
/// of `rect`, such that the projection is `start + a * length1 + b * length2`.
/// Not clamped.
pub fn solve_closest_point_on_plane(rect: &Rectangle, point: DVec3) -> (f64, f64) {
    let r = point - rect.start();
    let a = r.dot(rect.length1()) / rect.length1_squared();
    let b = r.dot(rect.length2()) / rect.length2_squared();
    (a, b)
}

pub fn closest_point_on_rectangle(rect: &Rectangle, point: DVec3) -> DVec3 {
    let (a, b) = solve_closest_point_on_plane(rect, point);
    rect.point_at(a.clamp(0.0, 1.0), b.clamp(0.0, 1.0))
}

pub fn distance_point_to_rectangle(rect: &Rectangle, point: DVec3) -> f64 {
    point.distance(closest_point_on_rectangle(rect, point))
}

/// Unclamped progress of the projection of `point` onto the line through the segment
fn solve_closest_point_on_line(start: DVec3, end: DVec3, point: DVec3) -> f64 {
    let direction = end - start;
    let length_squared = direction.length_squared();
    if length_squared == 0.0 {
        return 0.0;
    }
    direction.dot(point - start) / length_squared
}

pub fn closest_point_on_segment(start: DVec3, end: DVec3, point: DVec3) -> DVec3 {
    let progress = solve_closest_point_on_line(start, end, point).clamp(0.0, 1.0);
    start + progress * (end - start)
}

pub fn distance_point_to_segment(start: DVec3, end: DVec3, point: DVec3) -> f64 {
    point.distance(closest_point_on_segment(start, end, point))
}

/// Intersection of a line segment with the infinite plane of `rect`.
///
/// Only proper crossings count: both endpoints must lie strictly on opposite
/// sides, so touching or sliding along the plane is not an intersection.
pub fn line_segment_plane_intersection(
    rect: &Rectangle,
    start: DVec3,
    end: DVec3,
) -> Option<DVec3> {
    let normal = rect.normal();
    let dot_start = (start - rect.start()).dot(normal);
    let dot_end = (end - rect.start()).dot(normal);

    if (dot_start >= 0.0 && dot_end >= 0.0) || (dot_start <= 0.0 && dot_end <= 0.0) {
        return None;
    }

    let progress = dot_start / (dot_start - dot_end);
    if progress <= 0.0 || progress >= 1.0 {
        return None;
    }

    Some(start + progress * (end - start))
}

/// Closest points between the segments [start1, end1] and [start2, end2]
pub fn closest_points_between_segments(
    start1: DVec3,
    end1: DVec3,
    start2: DVec3,
    end2: DVec3,
) -> SegmentPair {
    let d1 = end1 - start1;
    let d2 = end2 - start2;
    let cross = d1.cross(d2);
    let cross_squared = cross.length_squared();

    let parallel =
        cross_squared <= PARALLEL_TOLERANCE * d1.length_squared() * d2.length_squared();
    if !parallel {
        // Closest points of the infinite lines
        let offset = start2 - start1;
        let a = offset.cross(d2).dot(cross) / cross_squared;
        let b = offset.cross(d1).dot(cross) / cross_squared;
        if (0.0..=1.0).contains(&a) && (0.0..=1.0).contains(&b) {
            let point1 = start1 + a * d1;
            let point2 = start2 + b * d2;
            return SegmentPair {
                distance: point1.distance(point2),
                point1,
                point2,
            };
        }
    }

    // The constrained minimum lies on the boundary of the parameter square:
    // one of the four endpoints against the other segment
    let mut best = endpoint_pair(start1, start2, end2, false);
    for candidate in [
        endpoint_pair(end1, start2, end2, false),
        endpoint_pair(start2, start1, end1, true),
        endpoint_pair(end2, start1, end1, true),
    ] {
        if candidate.distance < best.distance {
            best = candidate;
        }
    }
    best
}

fn endpoint_pair(endpoint: DVec3, start: DVec3, end: DVec3, swapped: bool) -> SegmentPair {
    let projected = closest_point_on_segment(start, end, endpoint);
    let distance = endpoint.distance(projected);
    if swapped {
        SegmentPair {
            distance,
            point1: projected,
            point2: endpoint,
        }
    } else {
        SegmentPair {
            distance,
            point1: endpoint,
            point2: projected,
        }
    }
}

/// Smallest distance between the segment [start, end] and `rect`
pub fn distance_segment_to_rectangle(rect: &Rectangle, start: DVec3, end: DVec3) -> SegmentContact {
    let mut closest = point_contact(rect, start);

    let end_contact = point_contact(rect, end);
    if end_contact.distance < closest.distance {
        closest = end_contact;
    }

    if let Some(intersection) = line_segment_plane_intersection(rect, start, end) {
        let contact = point_contact(rect, intersection);
        if contact.distance < closest.distance {
            closest = contact;
        }
    }

    for (edge_start, edge_length) in rect.edges() {
        let pair = closest_points_between_segments(start, end, edge_start, edge_start + edge_length);
        if pair.distance < closest.distance {
            closest = SegmentContact {
                distance: pair.distance,
                on_segment: pair.point1,
                on_rectangle: pair.point2,
            };
        }
    }

    closest
}

fn point_contact(rect: &Rectangle, point: DVec3) -> SegmentContact {
    let on_rectangle = closest_point_on_rectangle(rect, point);
    SegmentContact {
        distance: point.distance(on_rectangle),
        on_segment: point,
        on_rectangle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rect(start: [f64; 3], length1: [f64; 3], length2: [f64; 3]) -> Rectangle {
        Rectangle::new(start.into(), length1.into(), length2.into()).unwrap()
    }

    fn v(x: f64, y: f64, z: f64) -> DVec3 {
        DVec3::new(x, y, z)
    }

    fn assert_close(expected: DVec3, actual: DVec3, margin: f64) {
        assert!(
            expected.distance(actual) <= margin,
            "expected {expected} but got {actual}"
        );
    }

    #[test]
    fn test_solve_closest_point_on_plane() {
        let margin = 0.001;
        let check = |expected: (f64, f64), actual: (f64, f64)| {
            assert!((expected.0 - actual.0).abs() < margin, "{expected:?} vs {actual:?}");
            assert!((expected.1 - actual.1).abs() < margin, "{expected:?} vs {actual:?}");
        };

        for y in [-2.5, -0.3, 0.0, 0.01, 1.0, 1.5] {
            let point = v(0.3, y, 0.4);
            check(
                (0.3, 0.4),
                solve_closest_point_on_plane(&rect([0.0; 3], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]), point),
            );
            check(
                (0.6, 0.4),
                solve_closest_point_on_plane(
                    &rect([0.0, 3.0, 0.0], [0.5, 0.0, 0.0], [0.0, 0.0, 1.0]),
                    point,
                ),
            );
            check(
                (0.6, -2.6),
                solve_closest_point_on_plane(
                    &rect([0.0, -3.0, 3.0], [0.5, 0.0, 0.0], [0.0, 0.0, 1.0]),
                    point,
                ),
            );
            check(
                (0.3, 1.5),
                solve_closest_point_on_plane(
                    &rect([0.0, -3.0, 0.0], [5.0, 0.0, -5.0], [1.0, 0.0, 1.0]),
                    v(3.0, y, 0.0),
                ),
            );
        }

        check(
            (2.0, -2.0),
            solve_closest_point_on_plane(
                &rect([0.0, 15.0, 0.0], [5.0, 0.0, 0.0], [0.0, 3.0, 0.0]),
                v(10.0, 9.0, 8.0),
            ),
        );
    }

    #[test]
    fn test_closest_point_on_rectangle() {
        let plane1 = rect([0.0; 3], [3.0, 0.0, 0.0], [0.0, 0.0, 1.0]);
        assert_close(DVec3::ZERO, closest_point_on_rectangle(&plane1, DVec3::ZERO), 0.001);
        assert_close(DVec3::ZERO, closest_point_on_rectangle(&plane1, v(-2.0, 5.0, -4.0)), 0.001);
        assert_close(v(2.0, 0.0, 1.0), closest_point_on_rectangle(&plane1, v(2.0, -5.0, 15.0)), 0.001);
        assert_close(v(3.0, 0.0, 1.0), closest_point_on_rectangle(&plane1, v(10.0, 10.0, 10.0)), 0.001);

        let plane2 = rect([1.0, 2.0, 3.0], [0.0, -5.0, 0.0], [1.0, 0.0, 0.0]);
        assert_close(v(1.5, 2.0, 3.0), closest_point_on_rectangle(&plane2, v(1.5, 3.0, 100.0)), 0.001);
        assert_close(v(1.5, 0.0, 3.0), closest_point_on_rectangle(&plane2, v(1.5, 0.0, -100.0)), 0.001);
    }

    #[test]
    fn test_distance_point_to_rectangle() {
        let plane = rect([1.0, 2.0, 3.0], [0.0, -5.0, 0.0], [1.0, 0.0, 0.0]);
        assert!(distance_point_to_rectangle(&plane, v(1.5, 1.0, 3.0)).abs() < 1e-9);
        assert!((distance_point_to_rectangle(&plane, v(1.5, 1.0, 5.0)) - 2.0).abs() < 1e-9);
        assert!((distance_point_to_rectangle(&plane, v(2.0, -3.0, 1.0)) - 2.0).abs() < 1e-9);
        assert!((distance_point_to_rectangle(&plane, v(2.0, -7.0, 0.0)) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_distance_point_to_segment() {
        let start = v(0.0, 0.0, 0.0);
        let end = v(2.0, 0.0, 0.0);
        assert!((distance_point_to_segment(start, end, v(1.0, 3.0, 0.0)) - 3.0).abs() < 1e-12);
        assert!((distance_point_to_segment(start, end, v(5.0, 4.0, 0.0)) - 5.0).abs() < 1e-12);
        // Degenerate segment behaves like a point
        assert!((distance_point_to_segment(start, start, v(0.0, 0.0, 2.0)) - 2.0).abs() < 1e-12);
    }

    fn check_intersection(plane: &Rectangle, start: DVec3, end: DVec3, expected: Option<DVec3>) {
        let actual = line_segment_plane_intersection(plane, start, end);
        match (expected, actual) {
            (Some(expected), Some(actual)) => assert_close(expected, actual, 0.001),
            (None, None) => {}
            _ => panic!("expected {expected:?} but got {actual:?}"),
        }
    }

    #[test]
    fn test_line_segment_plane_intersection() {
        let plane1 = rect([0.0; 3], [3.0, 0.0, 0.0], [0.0, 0.0, 1.0]);

        // Parallel or sliding segments never intersect
        for y in [-5.0, 0.0, 1.0, 5.0] {
            check_intersection(&plane1, v(3.0, y, 5.0), v(10.0, y, 6.0), None);
        }

        check_intersection(&plane1, v(-2.0, -5.0, -1.0), v(1.0, 10.0, -7.0), Some(v(-1.0, 0.0, -3.0)));
        check_intersection(&plane1, v(-2.0, 5.0, -1.0), v(1.0, -10.0, -7.0), Some(v(-1.0, 0.0, -3.0)));

        // The line crosses the plane but the segment does not
        check_intersection(&plane1, v(-2.0, 5.0, -1.0), v(1.0, 10.0, -7.0), None);
        check_intersection(&plane1, v(-2.0, 10.0, -1.0), v(1.0, 5.0, -7.0), None);
        check_intersection(&plane1, v(-2.0, -5.0, -1.0), v(1.0, -10.0, -7.0), None);
        check_intersection(&plane1, v(-2.0, -10.0, -1.0), v(1.0, -5.0, -7.0), None);

        // Endpoint touching the plane is not a crossing
        check_intersection(&plane1, v(0.5, 0.0, 0.5), v(0.5, 2.0, 0.5), None);

        let plane2 = rect([1.0, 2.0, 3.0], [0.0, -5.0, 0.0], [1.0, 0.0, 0.0]);
        check_intersection(&plane2, v(12.0, 34.0, -7.0), v(12.0, 39.0, 43.0), Some(v(12.0, 35.0, 3.0)));
        check_intersection(&plane2, v(12.0, 34.0, -7.0), v(12.0, 39.0, 2.9), None);
    }

    #[test]
    fn test_closest_points_between_skew_segments() {
        let pair = closest_points_between_segments(
            v(-1.0, 0.0, 0.0),
            v(1.0, 0.0, 0.0),
            v(0.0, -1.0, 2.0),
            v(0.0, 1.0, 2.0),
        );
        assert!((pair.distance - 2.0).abs() < 1e-12);
        assert_close(DVec3::ZERO, pair.point1, 1e-9);
        assert_close(v(0.0, 0.0, 2.0), pair.point2, 1e-9);
    }

    #[test]
    fn test_closest_points_between_disjoint_skew_segments() {
        // The infinite lines meet at the origin, but the second segment stops short
        let pair = closest_points_between_segments(
            v(-1.0, 0.0, 0.0),
            v(1.0, 0.0, 0.0),
            v(0.0, 2.0, 0.0),
            v(0.0, 5.0, 0.0),
        );
        assert!((pair.distance - 2.0).abs() < 1e-12);
        assert_close(DVec3::ZERO, pair.point1, 1e-9);
        assert_close(v(0.0, 2.0, 0.0), pair.point2, 1e-9);
    }

    #[test]
    fn test_closest_points_between_parallel_segments() {
        // Overlapping parallel segments, 1m apart
        let overlapping = closest_points_between_segments(
            v(0.0, 0.0, 0.0),
            v(4.0, 0.0, 0.0),
            v(2.0, 1.0, 0.0),
            v(6.0, 1.0, 0.0),
        );
        assert!((overlapping.distance - 1.0).abs() < 1e-12);

        // Disjoint collinear segments
        let disjoint = closest_points_between_segments(
            v(0.0, 0.0, 0.0),
            v(1.0, 0.0, 0.0),
            v(3.0, 0.0, 0.0),
            v(5.0, 0.0, 0.0),
        );
        assert!((disjoint.distance - 2.0).abs() < 1e-12);
        assert_close(v(1.0, 0.0, 0.0), disjoint.point1, 1e-12);
        assert_close(v(3.0, 0.0, 0.0), disjoint.point2, 1e-12);
    }

    #[test]
    fn test_distance_segment_to_rectangle() {
        let floor = rect([0.0; 3], [2.0, 0.0, 0.0], [0.0, 0.0, 2.0]);

        // Crossing the rectangle
        let crossing = distance_segment_to_rectangle(&floor, v(1.0, 1.0, 1.0), v(1.0, -1.0, 1.0));
        assert!(crossing.distance < 1e-12);
        assert_close(v(1.0, 0.0, 1.0), crossing.on_rectangle, 1e-9);

        // Hovering above, parallel
        let above = distance_segment_to_rectangle(&floor, v(0.5, 0.3, 0.5), v(1.5, 0.3, 1.5));
        assert!((above.distance - 0.3).abs() < 1e-12);

        // Passing beside an edge
        let beside = distance_segment_to_rectangle(&floor, v(3.0, 1.0, 1.0), v(3.0, -1.0, 1.0));
        assert!((beside.distance - 1.0).abs() < 1e-12);
        assert_close(v(3.0, 0.0, 1.0), beside.on_segment, 1e-9);
        assert_close(v(2.0, 0.0, 1.0), beside.on_rectangle, 1e-9);
    }

    fn coordinate() -> impl Strategy<Value = f64> {
        -50.0..50.0f64
    }

    fn point() -> impl Strategy<Value = DVec3> {
        (coordinate(), coordinate(), coordinate()).prop_map(|(x, y, z)| DVec3::new(x, y, z))
    }

    /// Random rectangle: any first edge, second edge perpendicular to it
    fn rectangle() -> impl Strategy<Value = Rectangle> {
        (point(), point(), point(), 0.1..10.0f64).prop_filter_map(
            "degenerate rectangle",
            |(start, length1, helper, width)| {
                let length2 = length1.cross(helper).normalize_or_zero() * width;
                if length1.length() < 0.1 || length2.length() < 0.05 {
                    return None;
                }
                Rectangle::new(start, length1, length2).ok()
            },
        )
    }

    proptest! {
        #[test]
        fn prop_zero_distance_only_on_rectangle(rect in rectangle(), a in -0.5..1.5f64, b in -0.5..1.5f64, lift in -2.0..2.0f64) {
            let unit_normal = rect.normal().normalize();
            let on_plane = rect.point_at(a, b);
            let outside_by = (-a).max(a - 1.0).max(-b).max(b - 1.0);

            let distance = distance_point_to_rectangle(&rect, on_plane);
            if outside_by <= 0.0 {
                prop_assert!(distance < 1e-9);
            } else if outside_by > 1e-6 {
                prop_assert!(distance > 0.0);
            }

            if lift.abs() > 1e-3 {
                let lifted = on_plane + unit_normal * lift;
                prop_assert!(distance_point_to_rectangle(&rect, lifted) >= lift.abs() - 1e-9);
            }
        }

        #[test]
        fn prop_segment_pair_is_symmetric(start1 in point(), end1 in point(), start2 in point(), end2 in point()) {
            let forward = closest_points_between_segments(start1, end1, start2, end2);
            let backward = closest_points_between_segments(start2, end2, start1, end1);
            prop_assert!((forward.distance - backward.distance).abs() <= 0.001);
            prop_assert!((forward.point1.distance(forward.point2) - forward.distance).abs() < 1e-9);

            // Clearly skewed segments have a single closest pair
            let (d1, d2) = (end1 - start1, end2 - start2);
            let skewed = d1.length() > 1.0
                && d2.length() > 1.0
                && d1.cross(d2).length() > 0.3 * d1.length() * d2.length();
            if skewed {
                prop_assert!(forward.point1.distance(backward.point2) <= 0.001);
                prop_assert!(forward.point2.distance(backward.point1) <= 0.001);
            }
        }

        #[test]
        fn prop_segment_pair_is_not_beaten_by_samples(start1 in point(), end1 in point(), start2 in point(), end2 in point()) {
            let pair = closest_points_between_segments(start1, end1, start2, end2);
            for i in 0..=10 {
                let sample = start1.lerp(end1, i as f64 / 10.0);
                prop_assert!(distance_point_to_segment(start2, end2, sample) >= pair.distance - 1e-7);
            }
        }
    }
}
