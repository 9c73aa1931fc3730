//! Axis-aligned bounding boxes

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box (inclusive on faces)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Cube of half-extent `radius` around `center`
    pub fn around(center: DVec3, radius: f64) -> Self {
        let extent = DVec3::splat(radius);
        Self {
            min: center - extent,
            max: center + extent,
        }
    }

    /// Grow the box by `margin` on every side
    pub fn expanded(&self, margin: f64) -> Self {
        let extent = DVec3::splat(margin);
        Self {
            min: self.min - extent,
            max: self.max + extent,
        }
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.min.y <= other.max.y
            && self.min.z <= other.max.z
            && other.min.x <= self.max.x
            && other.min.y <= self.max.y
            && other.min.z <= self.max.z
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_is_inclusive() {
        let a = Aabb::new(DVec3::ZERO, DVec3::ONE);
        let b = Aabb::new(DVec3::ONE, DVec3::splat(2.0));
        let c = Aabb::new(DVec3::new(1.001, 0.0, 0.0), DVec3::splat(2.0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_expanded() {
        let a = Aabb::new(DVec3::ZERO, DVec3::ONE).expanded(0.5);
        assert_eq!(a.min, DVec3::splat(-0.5));
        assert_eq!(a.max, DVec3::splat(1.5));
        assert!(a.contains_point(DVec3::splat(-0.5)));
        assert!(!a.contains_point(DVec3::new(1.6, 0.0, 0.0)));
    }
}
