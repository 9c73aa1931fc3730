//! Read-side snapshots for presentation
//!
//! A [`SceneQuery`] is filled by [`Scene::read`] and then blended towards a
//! render time. Buffers are reused between reads.

use std::collections::HashMap;
use std::time::Instant;

use glam::DVec3;

use super::{EntityId, EntitySpawnRequest, Material, Scene, Tile, TilePlaceRequest};
use crate::error::PhysicsError;
use crate::geometry::Aabb;
use crate::settings::SceneSettings;

/// Copy of an entity at the time of the read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub radius: f64,
    pub material: Material,
    /// Committed position one step before `current_position`
    pub previous_position: DVec3,
    /// Committed position at the time of the read
    pub current_position: DVec3,
    /// Display position, recomputed by the blending methods
    pub position: DVec3,
    pub velocity: DVec3,
}

/// Caller-owned snapshot of a region of a [`Scene`]
#[derive(Debug)]
pub struct SceneQuery {
    pub(crate) tiles: Vec<Tile>,
    pub(crate) entities: Vec<EntitySnapshot>,
    pub(crate) tile_indices: Vec<usize>,
    pub(crate) generation: Option<u64>,
    pub(crate) bounds: Option<Aabb>,
    pub(crate) last_update: Instant,
    pub(crate) settings: SceneSettings,
}

impl Default for SceneQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneQuery {
    pub fn new() -> Self {
        Self {
            tiles: Vec::with_capacity(20),
            entities: Vec::with_capacity(10),
            tile_indices: Vec::with_capacity(20),
            generation: None,
            bounds: None,
            last_update: Instant::now(),
            settings: SceneSettings::default(),
        }
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn entities(&self) -> &[EntitySnapshot] {
        &self.entities
    }

    /// When the scene state in this snapshot was last changed
    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    /// Bounds of the last read, if any
    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    /// Elapsed fraction of a step between the last update and `render_time`
    fn steps_since_update(&self, render_time: Instant) -> f64 {
        let elapsed = render_time.saturating_duration_since(self.last_update);
        elapsed.as_secs_f64() / self.settings.dt()
    }

    fn blend(&mut self, progress: f64) {
        for entity in &mut self.entities {
            entity.position = entity.previous_position.lerp(entity.current_position, progress);
        }
    }

    /// Place every entity between its previous and current position. Lags
    /// one step behind the simulation but never shows anything invalid.
    pub fn interpolate(&mut self, render_time: Instant) {
        let progress = self.steps_since_update(render_time).clamp(0.0, 1.0);
        self.blend(progress);
    }

    /// Continue the last step linearly past the current position, by at
    /// most the configured `max_extrapolation_steps`. Cheap, but may show
    /// entities inside tiles.
    pub fn extrapolate_simple(&mut self, render_time: Instant) {
        self.extrapolate_simple_by(render_time, self.settings.max_extrapolation_steps);
    }

    /// [`Self::extrapolate_simple`] with an explicit cap in steps
    pub fn extrapolate_simple_by(&mut self, render_time: Instant, max_steps: f64) {
        let progress = 1.0 + self.steps_since_update(render_time).min(max_steps);
        self.blend(progress);
    }

    /// Simulate the snapshot one step ahead in a throwaway scene and blend
    /// towards that. Costs one extra step per call.
    ///
    /// Entities the throwaway scene could not predict, and all entities when
    /// the step fails, are shown at their current position.
    pub fn extrapolate_accurately(&mut self, render_time: Instant) -> Result<(), PhysicsError> {
        let Some(bounds) = self.bounds else {
            return Ok(());
        };
        for entity in &mut self.entities {
            entity.position = entity.current_position;
        }

        let progress = self.steps_since_update(render_time).min(1.0);
        let (predicted, slots) = self.predict(bounds)?;
        for prediction in &predicted.entities {
            if let Some(&slot) = slots.get(&prediction.id) {
                self.entities[slot].position =
                    prediction.previous_position.lerp(prediction.current_position, progress);
            }
        }
        Ok(())
    }

    /// Step a copy of the snapshot once. Returns the copy's state and where
    /// each of its entities sits in `self.entities`.
    fn predict(
        &self,
        bounds: Aabb,
    ) -> Result<(SceneQuery, HashMap<EntityId, usize>), PhysicsError> {
        let settings = SceneSettings {
            spawn_margin: 0.0,
            ..self.settings.clone()
        };
        let shadow = Scene::with_valid_settings(settings);

        for tile in &self.tiles {
            shadow.add_tile(TilePlaceRequest::new(tile.collider).with_material(tile.material));
        }
        let pending: Vec<_> = self
            .entities
            .iter()
            .map(|entity| {
                shadow.spawn_entity(
                    EntitySpawnRequest::new(entity.current_position, entity.radius)
                        .with_material(entity.material)
                        .with_velocity(entity.velocity),
                )
            })
            .collect();

        shadow.update(shadow.step_duration())?;
        let mut predicted = SceneQuery::new();
        shadow.read(&mut predicted, bounds);

        let slots = pending
            .iter()
            .enumerate()
            .filter_map(|(slot, pending)| pending.id().map(|id| (id, slot)))
            .collect();
        Ok((predicted, slots))
    }
}
