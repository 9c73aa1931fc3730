//! Geometry primitives
//!
//! Stateless distance, intersection and continuous sweep tests over points,
//! line segments, rectangles and spheres. Everything works in `f64` metres.

pub mod aabb;
pub mod distance;
pub mod rectangle;
pub mod sweep;

pub use aabb::Aabb;
pub use distance::{
    SegmentContact, SegmentPair, closest_point_on_rectangle, closest_point_on_segment,
    closest_points_between_segments, distance_point_to_rectangle, distance_point_to_segment,
    distance_segment_to_rectangle, line_segment_plane_intersection, solve_closest_point_on_plane,
};
pub use rectangle::Rectangle;
pub use sweep::{Sweep, sweep_sphere_to_rectangle, sweep_sphere_to_sphere};
