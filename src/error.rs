//! Error types
//!
//! Geometry and physics errors describe broken invariants: the simulation
//! halts on them instead of silently degrading. Rejected spawn or placement
//! requests are not errors.

use glam::DVec3;
use thiserror::Error;

/// Violated geometric preconditions
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("length1 {length1} must be perpendicular to length2 {length2}")]
    NotPerpendicular { length1: DVec3, length2: DVec3 },

    #[error("rectangle at {start} with edges {length1} and {length2} must be finite with non-zero edges")]
    DegenerateRectangle {
        start: DVec3,
        length1: DVec3,
        length2: DVec3,
    },

    #[error("sphere at {center} with radius {radius} is already inside {rectangle}")]
    SphereInsideRectangle {
        center: DVec3,
        radius: f64,
        rectangle: String,
    },
}

/// Fatal simulation failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhysicsError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The clamping loop of a move halved the displacement down to zero while
    /// the target was still too far from the committed position
    #[error("unsafe move: actual distance is {actual} but safe distance is {safe}")]
    UnsafeMove { actual: f64, safe: f64 },

    #[error("scene is already being updated by another thread")]
    ConcurrentUpdate,

    #[error("scene was halted by an earlier failure")]
    Halted,
}

/// Problems loading scene settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}
