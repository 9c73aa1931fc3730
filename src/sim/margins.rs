//! Iterative separation solver
//!
//! Nudges a sphere away from nearby spheres and rectangles until it keeps a
//! small gap to all of them.

use glam::DVec3;

use crate::geometry::{Rectangle, closest_point_on_rectangle};

const MAX_ITERATIONS: usize = 5;
/// Fraction of the desired margin every neighbour must keep afterwards
const ACCEPTED_FRACTION: f64 = 0.6;

/// Reusable candidate buffers for [`Margins::create`]
#[derive(Debug, Default)]
pub struct Margins {
    spheres: Vec<(DVec3, f64)>,
    rectangles: Vec<Rectangle>,
}

impl Margins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to move the sphere at `position` so that it keeps `margin`
    /// between itself and every given sphere `(center, radius)` and
    /// rectangle. When the full margin cannot be reached, progressively
    /// smaller margins are tried.
    ///
    /// Returns whether `position` was changed. The sphere never moves by more
    /// than twice the margin.
    pub fn create<'a>(
        &mut self,
        position: &mut DVec3,
        radius: f64,
        spheres: impl IntoIterator<Item = (DVec3, f64)>,
        rectangles: impl IntoIterator<Item = &'a Rectangle>,
        margin: f64,
    ) -> bool {
        let largest_move = 2.0 * margin;
        let candidate_margin = 3.0 * margin;
        let origin = *position;

        self.spheres.clear();
        self.spheres.extend(spheres.into_iter().filter(|&(center, other_radius)| {
            origin.distance(center) - radius - other_radius < candidate_margin
        }));
        self.rectangles.clear();
        self.rectangles.extend(
            rectangles
                .into_iter()
                .filter(|rect| rect_gap(rect, origin, radius) < candidate_margin)
                .copied(),
        );

        let mut desired = margin;
        for _ in 0..MAX_ITERATIONS {
            let mut candidate = origin;

            for &(center, other_radius) in &self.spheres {
                let offset = center - candidate;
                let distance = offset.length();
                let gap = distance - radius - other_radius;
                if desired > gap && distance > 0.0 {
                    candidate -= offset / distance * (desired - gap);
                }
            }
            for rect in &self.rectangles {
                let closest = closest_point_on_rectangle(rect, candidate);
                let distance = candidate.distance(closest);
                let gap = distance - radius;
                if desired > gap && distance > 0.0 {
                    candidate += (candidate - closest) / distance * (desired - gap);
                }
            }

            if candidate == origin {
                return false;
            }

            let minimum_gap = ACCEPTED_FRACTION * desired;
            let accepted = origin.distance(candidate) <= largest_move
                && self
                    .spheres
                    .iter()
                    .all(|&(center, other_radius)| {
                        candidate.distance(center) - radius - other_radius >= minimum_gap
                    })
                && self
                    .rectangles
                    .iter()
                    .all(|rect| rect_gap(rect, candidate, radius) >= minimum_gap);

            if accepted {
                *position = candidate;
                return true;
            }

            desired /= 2.0;
        }

        false
    }
}

fn rect_gap(rect: &Rectangle, center: DVec3, radius: f64) -> f64 {
    center.distance(closest_point_on_rectangle(rect, center)) - radius
}
