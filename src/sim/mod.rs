//! Deterministic simulation module
//!
//! Everything that moves lives here. Given the same requests and the same
//! update durations, a scene produces bit-identical results:
//! - Fixed timestep only
//! - Stable iteration order (entity slots in spawn order)
//! - No intra-tick parallelism

pub mod clustering;
pub mod entity;
pub mod margins;
pub mod material;
mod movement;
pub mod query;
pub mod request;
pub mod scene;
pub mod tile;
pub mod tile_tree;

pub use clustering::EntityClustering;
pub use entity::{Entity, EntityAttachment, EntityId, UpdateParameters};
pub use margins::Margins;
pub use material::Material;
pub use query::{EntitySnapshot, SceneQuery};
pub use request::{EntitySpawnRequest, Pending, TilePlaceRequest};
pub use scene::Scene;
pub use tile::{Tile, TileId};
pub use tile_tree::TileTree;
