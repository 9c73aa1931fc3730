//! Physical materials of entities and tiles

use serde::{Deserialize, Serialize};

/// Surface and bulk properties shared by entities and tiles
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Density in kg/m³ (only entities use it, tiles have infinite mass)
    pub density: f64,
    /// Restitution contribution; the bounces of both colliders are summed
    pub bounce: f64,
    /// Friction coefficient; multiplied with the other collider's coefficient
    pub friction: f64,
}

impl Material {
    pub const IRON: Material = Material {
        density: 7874.0,
        bounce: 0.1,
        friction: 0.5,
    };

    pub const RUBBER: Material = Material {
        density: 1100.0,
        bounce: 0.4,
        friction: 0.9,
    };

    pub const ICE: Material = Material {
        density: 917.0,
        bounce: 0.05,
        friction: 0.02,
    };
}

impl Default for Material {
    fn default() -> Self {
        Self::IRON
    }
}
