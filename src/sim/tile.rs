//! Static rectangular colliders

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Material;
use crate::geometry::Rectangle;

/// Scene-unique tile identifier, allocated in placement order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId(pub u64);

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile#{}", self.0)
    }
}

/// An immovable collider. Tiles are never removed once placed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub id: TileId,
    pub collider: Rectangle,
    pub material: Material,
}
