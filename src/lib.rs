//! Balls Physics - deterministic 3D sphere simulation
//!
//! Core modules:
//! - `geometry`: Distance, intersection and continuous sweep primitives
//! - `sim`: Spatial indices, per-tick movement, scene scheduling and queries
//! - `settings`: Data-driven scene configuration
//! - `error`: Error types for broken invariants and bad configuration
//!
//! All lengths are metres, speeds metres per second, masses kilograms.

pub mod error;
pub mod geometry;
pub mod settings;
pub mod sim;

pub use error::{GeometryError, PhysicsError, SettingsError};
pub use geometry::{Aabb, Rectangle, Sweep};
pub use settings::SceneSettings;
pub use sim::{
    EntityAttachment, EntityId, EntitySnapshot, EntitySpawnRequest, Material, Pending, Scene,
    SceneQuery, Tile, TileId, TilePlaceRequest, UpdateParameters,
};

/// Simulation constants
pub mod consts {
    use std::time::Duration;

    /// Fixed simulation timestep (100 Hz)
    pub const STEP_DURATION: Duration = Duration::from_millis(10);

    /// Downward gravitational acceleration (m/s²)
    pub const GRAVITY: f64 = 9.8;

    /// Entities beyond this coordinate (in any axis) are destroyed
    pub const WORLD_LIMIT: f64 = 10_000.0;

    /// One millimetre, the base tolerance of all contact arithmetic
    pub const MILLIMETER: f64 = 0.001;

    /// Slack on top of the radius before a sweep is considered at all
    pub const SWEEP_MISS_TOLERANCE: f64 = MILLIMETER;

    /// Precision of the sweep root search (and the DIRTY grazing band)
    pub const SWEEP_PRECISION: f64 = 0.1 * MILLIMETER;

    /// Contacts whose path distance is within this of the nearest are resolved together
    pub const SIMULTANEOUS_CONTACT_TOLERANCE: f64 = MILLIMETER;

    /// Gap opened by the margin solver between movement retries
    pub const RETRY_MARGIN: f64 = 0.2 * MILLIMETER;

    /// Gap enforced around freshly spawned entities
    pub const SPAWN_MARGIN: f64 = MILLIMETER;
}
