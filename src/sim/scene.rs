//! Fixed-timestep scene scheduler
//!
//! Owns every entity and tile behind one lock. Creation requests are queued
//! lock-free by any thread and drained at the start of [`Scene::update`];
//! the update itself runs whole steps and takes the lock once per step, so
//! readers can interleave between steps.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use glam::DVec3;
use parking_lot::Mutex;

use super::movement::EntityMovement;
use super::{
    Entity, EntityClustering, EntityId, EntitySnapshot, EntitySpawnRequest, Margins, Pending,
    SceneQuery, Tile, TileId, TilePlaceRequest, TileTree,
};
use crate::error::{PhysicsError, SettingsError};
use crate::geometry::{Aabb, distance_point_to_rectangle};
use crate::settings::SceneSettings;

/// Authoritative simulation state, only touched under the scene lock
struct SceneState {
    entities: Vec<Entity>,
    tiles: TileTree,
    clustering: EntityClustering,
    movement: EntityMovement,
    margins: Margins,
    query_tiles: Vec<usize>,

    next_entity_id: u64,
    next_tile_id: u64,
    /// Time not yet consumed by whole steps
    remaining: Duration,
    /// Bumped whenever the observable state changes
    generation: u64,
    last_update: Instant,
}

impl SceneState {
    fn new(settings: &SceneSettings) -> Self {
        Self {
            entities: Vec::new(),
            tiles: TileTree::new(Aabb::around(DVec3::ZERO, settings.world_limit)),
            clustering: EntityClustering::new(),
            movement: EntityMovement::new(settings),
            margins: Margins::new(),
            query_tiles: Vec::new(),
            next_entity_id: 0,
            next_tile_id: 0,
            remaining: Duration::ZERO,
            generation: 0,
            last_update: Instant::now(),
        }
    }

    /// Whether a sphere fits without touching any tile or entity
    fn can_spawn(&mut self, position: DVec3, radius: f64) -> bool {
        self.tiles
            .query(&Aabb::around(position, 2.0 * radius), &mut self.query_tiles);
        let touches_tile = self.query_tiles.iter().any(|&index| {
            distance_point_to_rectangle(&self.tiles.tile(index).collider, position) <= radius
        });
        if touches_tile {
            return false;
        }

        !self.entities.iter().any(|entity| {
            let combined_radius = radius + entity.radius;
            entity.position.distance_squared(position) <= combined_radius * combined_radius
        })
    }

    fn spawn(&mut self, request: EntitySpawnRequest, settings: &SceneSettings) -> Option<EntityId> {
        let EntitySpawnRequest {
            mut position,
            radius,
            material,
            velocity,
            attachment,
        } = request;

        if !(radius > 0.0) || !position.is_finite() || !velocity.is_finite() {
            log::debug!("Rejected spawn at {position} with radius {radius}: invalid request");
            return None;
        }
        if position.abs().max_element() > settings.world_limit {
            log::debug!("Rejected spawn at {position}: beyond the world limit");
            return None;
        }
        if !self.can_spawn(position, radius) {
            log::debug!("Rejected spawn at {position} with radius {radius}: overlaps existing geometry");
            return None;
        }

        if settings.spawn_margin > 0.0 {
            let reach = 2.0 * radius + 3.0 * settings.spawn_margin;
            self.tiles
                .query(&Aabb::around(position, reach), &mut self.query_tiles);
            let spheres = self
                .entities
                .iter()
                .map(|entity| (entity.position, entity.radius));
            let rectangles = self
                .query_tiles
                .iter()
                .map(|&index| &self.tiles.tile(index).collider);
            let original = position;
            if self
                .margins
                .create(&mut position, radius, spheres, rectangles, settings.spawn_margin)
            {
                log::debug!("Moved spawn from {original} to {position} to keep a margin");
            }
        }

        let id = EntityId(self.next_entity_id);
        self.next_entity_id += 1;
        self.entities
            .push(Entity::new(id, radius, material, position, velocity, attachment));
        log::debug!("Spawned {id} at {position}");
        Some(id)
    }

    fn place(&mut self, request: TilePlaceRequest) -> Option<TileId> {
        let TilePlaceRequest { collider, material } = request;

        let blocked = self.entities.iter().any(|entity| {
            distance_point_to_rectangle(&collider, entity.position) <= entity.radius
        });
        if blocked {
            log::debug!("Rejected tile {collider}: intersects an entity");
            return None;
        }

        let id = TileId(self.next_tile_id);
        self.next_tile_id += 1;
        self.tiles.insert(Tile {
            id,
            collider,
            material,
        });
        log::debug!("Placed {id}");
        Some(id)
    }

    /// Advance every entity by one step
    fn tick(&mut self, world_limit: f64) -> Result<(), PhysicsError> {
        for entity in &mut self.entities {
            entity.begin_tick();
        }
        for (slot, entity) in self.entities.iter().enumerate() {
            let safety_radius = self.movement.safety_radius(entity);
            self.clustering.insert(slot, entity.position, safety_radius);
        }

        let result = self.move_entities();
        self.clustering.reset();
        result?;

        for entity in &mut self.entities {
            entity.commit_tick();
        }
        self.entities.retain(|entity| {
            let beyond = entity.is_beyond(world_limit);
            if beyond {
                log::warn!("Destroyed {} at {}: beyond the world limit", entity.id, entity.position);
            }
            !beyond
        });

        self.generation += 1;
        self.last_update = Instant::now();
        Ok(())
    }

    fn move_entities(&mut self) -> Result<(), PhysicsError> {
        for slot in 0..self.entities.len() {
            self.movement
                .update(slot, &mut self.entities, &self.tiles, &self.clustering)?;
            self.entities[slot].run_attachment();
        }
        Ok(())
    }
}

/// Clears the update flag even when a step panics
struct UpdateGuard<'a>(&'a AtomicBool);

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A simulated world of spheres and tiles
///
/// `Scene` is `Send + Sync`; share it with an `Arc`. One thread should call
/// [`Scene::update`] in a loop while any thread submits requests or reads.
pub struct Scene {
    settings: SceneSettings,
    state: Mutex<SceneState>,
    entity_requests: SegQueue<(EntitySpawnRequest, Pending<EntityId>)>,
    tile_requests: SegQueue<(TilePlaceRequest, Pending<TileId>)>,
    updating: AtomicBool,
    halted: AtomicBool,
}

impl Scene {
    pub fn new(settings: SceneSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        log::info!(
            "Created scene: step={}ms gravity={} world_limit={}",
            settings.step_millis,
            settings.gravity,
            settings.world_limit
        );
        Ok(Self::with_valid_settings(settings))
    }

    pub(crate) fn with_valid_settings(settings: SceneSettings) -> Self {
        Self {
            state: Mutex::new(SceneState::new(&settings)),
            settings,
            entity_requests: SegQueue::new(),
            tile_requests: SegQueue::new(),
            updating: AtomicBool::new(false),
            halted: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &SceneSettings {
        &self.settings
    }

    pub fn step_duration(&self) -> Duration {
        self.settings.step_duration()
    }

    pub fn entity_count(&self) -> usize {
        self.state.lock().entities.len()
    }

    pub fn tile_count(&self) -> usize {
        self.state.lock().tiles.len()
    }

    /// Whether an earlier update failed fatally
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Queue a sphere for the next update
    pub fn spawn_entity(&self, request: EntitySpawnRequest) -> Pending<EntityId> {
        let pending = Pending::new();
        self.entity_requests.push((request, pending.clone()));
        pending
    }

    /// Queue a tile for the next update
    pub fn add_tile(&self, request: TilePlaceRequest) -> Pending<TileId> {
        let pending = Pending::new();
        self.tile_requests.push((request, pending.clone()));
        pending
    }

    /// Drain the request queues, then run as many whole steps as the
    /// accumulated time allows. Leftover time carries over to the next call.
    ///
    /// A failing step halts the scene for good.
    pub fn update(&self, duration: Duration) -> Result<(), PhysicsError> {
        if self.is_halted() {
            return Err(PhysicsError::Halted);
        }
        if self.updating.swap(true, Ordering::AcqRel) {
            return Err(PhysicsError::ConcurrentUpdate);
        }
        let _guard = UpdateGuard(&self.updating);

        let result = self.run_steps(duration);
        if let Err(err) = &result {
            log::error!("Scene halted: {err}");
            self.halted.store(true, Ordering::Release);
        }
        result
    }

    fn run_steps(&self, duration: Duration) -> Result<(), PhysicsError> {
        let step = self.step_duration();
        {
            let mut state = self.state.lock();
            self.process_requests(&mut state);
            state.remaining += duration;
        }

        loop {
            let mut state = self.state.lock();
            if state.remaining < step {
                return Ok(());
            }
            state.tick(self.settings.world_limit)?;
            state.remaining -= step;
        }
    }

    /// Spawns go first, so a tile can never be placed inside an entity that
    /// was requested in the same batch
    fn process_requests(&self, state: &mut SceneState) {
        let mut changed = false;

        while let Some((request, pending)) = self.entity_requests.pop() {
            let id = state.spawn(request, &self.settings);
            changed |= id.is_some();
            pending.complete(id);
        }
        while let Some((request, pending)) = self.tile_requests.pop() {
            let id = state.place(request);
            changed |= id.is_some();
            pending.complete(id);
        }

        if changed {
            state.generation += 1;
            state.last_update = Instant::now();
        }
    }

    /// Fill `query` with copies of every tile and entity overlapping
    /// `bounds`. Does nothing when neither the scene nor the bounds changed
    /// since the last read into this query.
    pub fn read(&self, query: &mut SceneQuery, bounds: Aabb) {
        let state = self.state.lock();
        if query.generation == Some(state.generation) && query.bounds == Some(bounds) {
            return;
        }

        query.generation = Some(state.generation);
        query.bounds = Some(bounds);
        query.last_update = state.last_update;
        query.settings.clone_from(&self.settings);

        state.tiles.query(&bounds, &mut query.tile_indices);
        query.tiles.clear();
        query
            .tiles
            .extend(query.tile_indices.iter().map(|&index| *state.tiles.tile(index)));

        query.entities.clear();
        query.entities.extend(
            state
                .entities
                .iter()
                .filter(|entity| Aabb::around(entity.position, entity.radius).overlaps(&bounds))
                .map(|entity| EntitySnapshot {
                    id: entity.id,
                    radius: entity.radius,
                    material: entity.material,
                    previous_position: entity.previous_position,
                    current_position: entity.position,
                    position: entity.position,
                    velocity: entity.velocity,
                }),
        );
    }
}

impl Default for Scene {
    fn default() -> Self {
        log::info!("Created scene with default settings");
        Self::with_valid_settings(SceneSettings::default())
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("settings", &self.settings)
            .field("halted", &self.is_halted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;
    use crate::geometry::Rectangle;
    use crate::sim::UpdateParameters;

    fn rectangle(start: [f64; 3], length1: [f64; 3], length2: [f64; 3]) -> Rectangle {
        Rectangle::new(start.into(), length1.into(), length2.into()).unwrap()
    }

    fn read_all(scene: &Scene, min: [f64; 3], max: [f64; 3]) -> SceneQuery {
        let mut query = SceneQuery::new();
        scene.read(&mut query, Aabb::new(min.into(), max.into()));
        query
    }

    #[test]
    fn test_gravity_acceleration() {
        let scene = Scene::default();
        scene.spawn_entity(EntitySpawnRequest::new(DVec3::new(10.0, 0.0, 123.0), 1.0));
        scene.update(Duration::from_secs(1)).unwrap();

        let query = read_all(&scene, [9.0, -10.0, 120.0], [11.0, 0.0, 125.0]);
        assert_eq!(query.entities().len(), 1);
        let subject = &query.entities()[0];
        assert!((subject.position.x - 10.0).abs() < 1e-9);
        assert!((subject.position.y + 4.9).abs() < 0.1);
        assert!((subject.position.z - 123.0).abs() < 1e-9);
        assert!(subject.velocity.x.abs() < 1e-9);
        assert!((subject.velocity.y + 9.8).abs() < 0.1);
        assert!(subject.velocity.z.abs() < 1e-9);
    }

    #[test]
    fn test_fall_on_flat_floor() {
        let scene = Scene::default();
        scene.spawn_entity(EntitySpawnRequest::new(DVec3::new(1.0, 2.0, 3.0), 0.1));
        scene.add_tile(TilePlaceRequest::new(rectangle(
            [0.5, 1.0, 2.0],
            [1.0, 0.0, 0.0],
            [0.0, 0.0, 1.5],
        )));
        scene.update(Duration::from_secs(10)).unwrap();

        let query = read_all(&scene, [0.0; 3], [5.0; 3]);
        assert_eq!(query.entities().len(), 1);
        let entity = &query.entities()[0];
        assert!((entity.position.x - 1.0).abs() <= 0.001);
        assert!((entity.position.y - 1.1).abs() <= 0.005, "y = {}", entity.position.y);
        assert!(entity.velocity.x.abs() <= 0.01);
        assert!(entity.velocity.y.abs() <= 0.1);
        assert!(entity.velocity.z.abs() <= 0.01);
    }

    #[test]
    fn test_roll_to_lowest_point() {
        let scene = Scene::default();
        scene.add_tile(TilePlaceRequest::new(rectangle(
            [-10.0, -10.0, 0.0],
            [20.0, 0.0, 0.0],
            [0.0, 1.0, 10.0],
        )));
        scene.add_tile(TilePlaceRequest::new(rectangle(
            [-10.0, -10.0, 0.0],
            [20.0, 0.0, 0.0],
            [0.0, 1.0, -10.0],
        )));
        scene.add_tile(TilePlaceRequest::new(rectangle(
            [0.0, -10.0, -10.0],
            [0.0, 0.0, 20.0],
            [10.0, 1.0, 0.0],
        )));
        scene.add_tile(TilePlaceRequest::new(rectangle(
            [0.0, -10.0, -10.0],
            [0.0, 0.0, 20.0],
            [-10.0, 1.0, 0.0],
        )));
        scene.spawn_entity(EntitySpawnRequest::new(DVec3::new(-5.0, -5.0, -5.0), 0.2));
        scene.update(Duration::from_secs(60)).unwrap();

        let query = read_all(&scene, [-10.0, -100.0, -10.0], [10.0, 100.0, 10.0]);
        assert_eq!(query.entities().len(), 1);
        let entity = &query.entities()[0];
        assert!(entity.position.x.abs() <= 0.01, "{}", entity.position);
        assert!((entity.position.y + 9.8).abs() <= 0.01, "{}", entity.position);
        assert!(entity.position.z.abs() <= 0.01, "{}", entity.position);
        assert!(entity.velocity.x.abs() <= 0.1);
        assert!(entity.velocity.y.abs() <= 0.2);
        assert!(entity.velocity.z.abs() <= 0.1);
    }

    #[test]
    fn test_requests_complete_on_update() {
        let scene = Scene::default();
        let first = scene.spawn_entity(EntitySpawnRequest::new(DVec3::ZERO, 1.0));
        let overlapping = scene.spawn_entity(EntitySpawnRequest::new(DVec3::new(1.5, 0.0, 0.0), 1.0));
        let tile = scene.add_tile(TilePlaceRequest::new(rectangle(
            [-5.0, -3.0, -5.0],
            [10.0, 0.0, 0.0],
            [0.0, 0.0, 10.0],
        )));
        assert!(!first.is_processed());
        assert!(!tile.is_processed());

        scene.update(Duration::ZERO).unwrap();
        assert_eq!(first.id(), Some(EntityId(0)));
        assert!(overlapping.is_rejected());
        assert_eq!(tile.id(), Some(TileId(0)));
        assert_eq!(scene.entity_count(), 1);
        assert_eq!(scene.tile_count(), 1);
    }

    #[test]
    fn test_rejects_spawn_inside_tile_and_tile_inside_entity() {
        let scene = Scene::default();
        scene.add_tile(TilePlaceRequest::new(rectangle(
            [-5.0, 0.0, -5.0],
            [10.0, 0.0, 0.0],
            [0.0, 0.0, 10.0],
        )));
        scene.update(Duration::ZERO).unwrap();

        let inside = scene.spawn_entity(EntitySpawnRequest::new(DVec3::new(0.0, 0.5, 0.0), 1.0));
        let crossing = scene.add_tile(TilePlaceRequest::new(rectangle(
            [-5.0, 1.0, -5.0],
            [10.0, 0.0, 0.0],
            [0.0, 0.0, 10.0],
        )));
        let resting = scene.spawn_entity(EntitySpawnRequest::new(DVec3::new(0.0, 1.5, 0.0), 1.0));
        scene.update(Duration::ZERO).unwrap();

        assert!(inside.is_rejected());
        assert!(crossing.is_rejected());
        assert_eq!(resting.id(), Some(EntityId(0)));
    }

    #[test]
    fn test_spawn_is_nudged_away_from_close_tile() {
        let scene = Scene::default();
        scene.add_tile(TilePlaceRequest::new(rectangle(
            [-5.0, 0.0, -5.0],
            [10.0, 0.0, 0.0],
            [0.0, 0.0, 10.0],
        )));
        scene.spawn_entity(EntitySpawnRequest::new(DVec3::new(0.0, 0.5001, 0.0), 0.5));
        scene.update(Duration::ZERO).unwrap();

        let query = read_all(&scene, [-1.0; 3], [1.0; 3]);
        let y = query.entities()[0].position.y;
        assert!(y > 0.5001, "y = {y}");
        assert!(y <= 0.5 + 0.002, "y = {y}");
    }

    #[test]
    fn test_accumulates_partial_steps() {
        let scene = Scene::default();
        scene.spawn_entity(EntitySpawnRequest::new(DVec3::ZERO, 0.1).with_velocity(DVec3::X));

        scene.update(Duration::from_millis(6)).unwrap();
        let query = read_all(&scene, [-1.0; 3], [1.0; 3]);
        assert_eq!(query.entities()[0].position.x, 0.0);

        scene.update(Duration::from_millis(6)).unwrap();
        let query = read_all(&scene, [-1.0; 3], [1.0; 3]);
        assert!((query.entities()[0].position.x - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_destroys_entities_beyond_world_limit() {
        let settings = SceneSettings {
            world_limit: 100.0,
            ..Default::default()
        };
        let scene = Scene::new(settings).unwrap();
        scene.spawn_entity(
            EntitySpawnRequest::new(DVec3::new(99.95, 0.0, 0.0), 0.1).with_velocity(DVec3::new(10.0, 0.0, 0.0)),
        );
        scene.spawn_entity(EntitySpawnRequest::new(DVec3::new(50.0, 0.0, 0.0), 0.1));
        scene.update(Duration::ZERO).unwrap();
        assert_eq!(scene.entity_count(), 2);

        scene.update(scene.step_duration()).unwrap();
        assert_eq!(scene.entity_count(), 1);
    }

    #[test]
    fn test_read_is_memoized() {
        let scene = Scene::default();
        scene.spawn_entity(EntitySpawnRequest::new(DVec3::ZERO, 0.5));
        scene.update(Duration::ZERO).unwrap();

        let bounds = Aabb::new(DVec3::splat(-2.0), DVec3::splat(2.0));
        let mut query = SceneQuery::new();
        scene.read(&mut query, bounds);
        assert_eq!(query.entities().len(), 1);

        // Same generation and bounds: the query is left alone
        query.entities[0].position = DVec3::splat(1.0);
        scene.read(&mut query, bounds);
        assert_eq!(query.entities()[0].position, DVec3::splat(1.0));

        // Different bounds refresh it
        scene.read(&mut query, bounds.expanded(1.0));
        assert_eq!(query.entities()[0].position, DVec3::ZERO);

        // So does a step
        query.entities[0].position = DVec3::splat(1.0);
        scene.update(scene.step_duration()).unwrap();
        scene.read(&mut query, bounds.expanded(1.0));
        assert!(query.entities()[0].position.y < 0.0);
    }

    #[test]
    fn test_read_filters_by_bounds() {
        let scene = Scene::default();
        scene.spawn_entity(EntitySpawnRequest::new(DVec3::ZERO, 0.5));
        scene.spawn_entity(EntitySpawnRequest::new(DVec3::new(10.0, 0.0, 0.0), 0.5));
        scene.add_tile(TilePlaceRequest::new(rectangle(
            [-5.0, -2.0, -5.0],
            [1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
        )));
        scene.add_tile(TilePlaceRequest::new(rectangle(
            [20.0, -2.0, -5.0],
            [1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
        )));
        scene.update(Duration::ZERO).unwrap();

        let query = read_all(&scene, [-6.0, -3.0, -6.0], [1.0, 1.0, 1.0]);
        assert_eq!(query.entities().len(), 1);
        assert_eq!(query.entities()[0].id, EntityId(0));
        assert_eq!(query.tiles().len(), 1);
        assert_eq!(query.tiles()[0].id, TileId(0));
    }

    #[test]
    fn test_attachment_overrides_velocity() {
        let scene = Scene::default();
        scene.spawn_entity(
            EntitySpawnRequest::new(DVec3::ZERO, 0.1).with_attachment(|parameters: &mut UpdateParameters| {
                parameters.velocity = DVec3::new(0.0, 0.0, 2.0);
            }),
        );
        scene.update(scene.step_duration() * 3).unwrap();

        let query = read_all(&scene, [-1.0; 3], [1.0; 3]);
        let entity = &query.entities()[0];
        assert_eq!(entity.velocity, DVec3::new(0.0, 0.0, 2.0));
        // First step falls, the next two follow the overridden velocity
        assert!((entity.position.z - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_update_is_rejected() {
        let scene = Arc::new(Scene::default());
        let barrier = Arc::new(Barrier::new(2));

        let inside = Arc::clone(&barrier);
        scene.spawn_entity(
            EntitySpawnRequest::new(DVec3::ZERO, 0.1).with_attachment(move |_: &mut UpdateParameters| {
                inside.wait();
                inside.wait();
            }),
        );

        let updater = {
            let scene = Arc::clone(&scene);
            thread::spawn(move || scene.update(scene.step_duration()))
        };

        // The updater is now parked inside the attachment
        barrier.wait();
        assert_eq!(
            scene.update(scene.step_duration()),
            Err(PhysicsError::ConcurrentUpdate)
        );
        barrier.wait();

        assert_eq!(updater.join().unwrap(), Ok(()));
        assert!(!scene.is_halted());
    }

    #[test]
    fn test_fatal_error_halts_scene() {
        let scene = Scene::default();
        scene.add_tile(TilePlaceRequest::new(rectangle(
            [-5.0, 0.0, -5.0],
            [10.0, 0.0, 0.0],
            [0.0, 0.0, 10.0],
        )));
        // Teleport into the floor, which the next step cannot recover from
        scene.spawn_entity(
            EntitySpawnRequest::new(DVec3::new(0.0, 1.0, 0.0), 0.1).with_attachment(
                |parameters: &mut UpdateParameters| {
                    parameters.position = DVec3::new(0.0, 0.05, 0.0);
                },
            ),
        );

        let result = scene.update(scene.step_duration() * 2);
        assert!(matches!(result, Err(PhysicsError::Geometry(_))), "{result:?}");
        assert!(scene.is_halted());
        assert_eq!(scene.update(scene.step_duration()), Err(PhysicsError::Halted));
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let settings = SceneSettings {
            step_millis: 0,
            ..Default::default()
        };
        assert!(Scene::new(settings).is_err());
    }
}
