//! Rectangular planar colliders
//!
//! A rectangle is a start corner plus two (nearly) orthogonal edge vectors:
//! every point is `start + a * length1 + b * length2` for a, b in [0, 1].
//! The rectangle does not need to be axis-aligned.

use std::fmt;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::Aabb;
use crate::error::GeometryError;

/// Largest allowed |length1 · length2| relative to the smaller squared edge length
const PERPENDICULAR_TOLERANCE: f64 = 0.01;

/// An immutable rectangle in 3D space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RectangleParts")]
pub struct Rectangle {
    start: DVec3,
    length1: DVec3,
    length2: DVec3,
}

#[derive(Deserialize)]
struct RectangleParts {
    start: DVec3,
    length1: DVec3,
    length2: DVec3,
}

impl TryFrom<RectangleParts> for Rectangle {
    type Error = GeometryError;

    fn try_from(parts: RectangleParts) -> Result<Self, Self::Error> {
        Self::new(parts.start, parts.length1, parts.length2)
    }
}

impl Rectangle {
    /// Create a rectangle, failing when the edges are not perpendicular or
    /// when any vector is not finite or an edge has no length
    pub fn new(start: DVec3, length1: DVec3, length2: DVec3) -> Result<Self, GeometryError> {
        let finite = start.is_finite() && length1.is_finite() && length2.is_finite();
        if !finite || length1.length_squared() == 0.0 || length2.length_squared() == 0.0 {
            return Err(GeometryError::DegenerateRectangle {
                start,
                length1,
                length2,
            });
        }

        let dot = length1.dot(length2).abs();
        let reference = length1.length_squared().min(length2.length_squared());
        if dot > PERPENDICULAR_TOLERANCE * reference {
            return Err(GeometryError::NotPerpendicular { length1, length2 });
        }
        Ok(Self {
            start,
            length1,
            length2,
        })
    }

    #[inline]
    pub fn start(&self) -> DVec3 {
        self.start
    }

    #[inline]
    pub fn length1(&self) -> DVec3 {
        self.length1
    }

    #[inline]
    pub fn length2(&self) -> DVec3 {
        self.length2
    }

    #[inline]
    pub fn length1_squared(&self) -> f64 {
        self.length1.length_squared()
    }

    #[inline]
    pub fn length2_squared(&self) -> f64 {
        self.length2.length_squared()
    }

    /// Unnormalized plane normal (length1 × length2)
    #[inline]
    pub fn normal(&self) -> DVec3 {
        self.length1.cross(self.length2)
    }

    /// Point at parametric coordinates (a, b)
    #[inline]
    pub fn point_at(&self, a: f64, b: f64) -> DVec3 {
        self.start + a * self.length1 + b * self.length2
    }

    /// The four corners, in edge order
    pub fn corners(&self) -> [DVec3; 4] {
        [
            self.start,
            self.start + self.length1,
            self.start + self.length1 + self.length2,
            self.start + self.length2,
        ]
    }

    /// The four boundary edges as (start, direction) pairs
    pub fn edges(&self) -> [(DVec3, DVec3); 4] {
        [
            (self.start, self.length1),
            (self.start, self.length2),
            (self.start + self.length1, self.length2),
            (self.start + self.length2, self.length1),
        ]
    }

    pub fn min(&self) -> DVec3 {
        let [a, b, c, d] = self.corners();
        a.min(b).min(c.min(d))
    }

    pub fn max(&self) -> DVec3 {
        let [a, b, c, d] = self.corners();
        a.max(b).max(c.max(d))
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.min(), self.max())
    }

    /// Whether the exact AABB of this rectangle overlaps `bounds`
    pub fn overlaps_bounds(&self, bounds: &Aabb) -> bool {
        self.bounds().overlaps(bounds)
    }

    /// Same rectangle, scaled about the origin
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            start: self.start * factor,
            length1: self.length1 * factor,
            length2: self.length2 * factor,
        }
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rectangle(start={}, length1={}, length2={})",
            self.start, self.length1, self.length2
        )
    }
}
