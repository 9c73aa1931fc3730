//! Continuous (swept) sphere tests
//!
//! A sweep moves a sphere along a displacement vector and reports the last
//! position along that path where the sphere is still clear of the target.

use glam::DVec3;

use super::Rectangle;
use super::distance::{
    closest_point_on_rectangle, distance_point_to_rectangle, distance_segment_to_rectangle,
};
use crate::consts::{SWEEP_MISS_TOLERANCE, SWEEP_PRECISION};
use crate::error::GeometryError;

/// Upper bound on root search iterations
const MAX_SEARCH_ITERATIONS: usize = 64;

/// Outcome of a sweep test
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sweep {
    /// The path never comes close to the target
    Miss,
    /// The path grazes the target within the search precision; retest with a
    /// shorter displacement instead of trusting this pass
    Dirty,
    /// The sphere centre can travel up to `sphere` without touching the target.
    /// `target` is the point on the target closest to `sphere`.
    Hit { sphere: DVec3, target: DVec3 },
}

/// Sweep a sphere of `radius` from `start` along `displacement` against `rect`.
///
/// Fails when the sphere already touches the rectangle at `start`.
pub fn sweep_sphere_to_rectangle(
    start: DVec3,
    displacement: DVec3,
    radius: f64,
    rect: &Rectangle,
) -> Result<Sweep, GeometryError> {
    let end = start + displacement;
    let full = distance_segment_to_rectangle(rect, start, end);
    if full.distance > radius + SWEEP_MISS_TOLERANCE {
        return Ok(Sweep::Miss);
    }

    let mut largest_safe_distance = distance_point_to_rectangle(rect, start);
    if largest_safe_distance <= radius {
        return Err(GeometryError::SphereInsideRectangle {
            center: start,
            radius,
            rectangle: rect.to_string(),
        });
    }

    let ideal_distance = distance_point_to_rectangle(rect, end);
    if ideal_distance > radius && full.distance > radius - SWEEP_PRECISION {
        return Ok(Sweep::Dirty);
    }

    let total_movement = displacement.length();
    if total_movement == 0.0 {
        return Ok(Sweep::Dirty);
    }

    let mut use_bisection = false;
    let mut signum_counter = 0i32;
    let mut largest_safe_movement = 0.0;

    let mut smallest_unsafe_movement = full.on_segment.distance(start);
    let mut smallest_unsafe_distance = full.distance;
    let mut candidate_movement = smallest_unsafe_movement;

    let mut iterations = 0;
    while smallest_unsafe_movement - largest_safe_movement > SWEEP_PRECISION
        && largest_safe_distance - radius > SWEEP_PRECISION
        && iterations < MAX_SEARCH_ITERATIONS
    {
        iterations += 1;

        let candidate = start + (candidate_movement / total_movement) * displacement;
        let distance = distance_point_to_rectangle(rect, candidate);

        if distance > radius {
            if signum_counter == -1 {
                use_bisection = true;
            }
            signum_counter -= 1;
            if largest_safe_movement < candidate_movement {
                largest_safe_movement = candidate_movement;
                largest_safe_distance = distance;
            }
        } else {
            if signum_counter == 1 {
                use_bisection = true;
            }
            signum_counter += 1;
            if smallest_unsafe_movement > candidate_movement {
                smallest_unsafe_movement = candidate_movement;
                smallest_unsafe_distance = distance;
            }
        }

        candidate_movement = if use_bisection {
            (largest_safe_movement + smallest_unsafe_movement) / 2.0
        } else {
            // Interpolate where the distance crosses the radius, nudged
            // towards whichever bracket end is closer to it
            let spread = largest_safe_distance - smallest_unsafe_distance;
            let mut factor = if spread > 0.0 {
                (largest_safe_distance - radius) / spread
            } else {
                0.5
            };
            factor *= if largest_safe_distance - radius > radius - smallest_unsafe_distance {
                1.05
            } else {
                0.95
            };
            largest_safe_movement
                + factor.clamp(0.0, 1.0) * (smallest_unsafe_movement - largest_safe_movement)
        };
    }

    let sphere = start + (largest_safe_movement / total_movement) * displacement;
    Ok(Sweep::Hit {
        sphere,
        target: closest_point_on_rectangle(rect, sphere),
    })
}

/// Sweep a sphere from `start` along `displacement` against a static sphere
/// at `center`, where `combined_radius` is the sum of both radii.
///
/// The hit position is backed off by the sweep precision so the spheres do
/// not touch afterwards. A sphere that already touches the target only hits
/// (at its start position) when it is moving towards the target.
pub fn sweep_sphere_to_sphere(
    start: DVec3,
    displacement: DVec3,
    combined_radius: f64,
    center: DVec3,
) -> Sweep {
    let offset = start - center;
    let approach = offset.dot(displacement);
    let c = offset.length_squared() - combined_radius * combined_radius;

    if c <= 0.0 {
        return if approach < 0.0 {
            Sweep::Hit {
                sphere: start,
                target: center,
            }
        } else {
            Sweep::Miss
        };
    }

    let a = displacement.length_squared();
    if a == 0.0 || approach >= 0.0 {
        return Sweep::Miss;
    }

    let discriminant = approach * approach - a * c;
    if discriminant < 0.0 {
        return Sweep::Miss;
    }

    let t = (-approach - discriminant.sqrt()) / a;
    if t > 1.0 {
        return Sweep::Miss;
    }

    let backed_off = (t - SWEEP_PRECISION / a.sqrt()).max(0.0);
    Sweep::Hit {
        sphere: start + backed_off * displacement,
        target: center,
    }
}
