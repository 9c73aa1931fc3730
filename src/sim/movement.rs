//! Per-entity continuous collision integration
//!
//! Every tick, each entity runs through
//! start → gather → sweep → clamp → resolve → (retry ≤ 2×) → friction → finish.
//!
//! Only the entity's working state is modified (plus the working velocity of
//! entities it pushes). The sweep/retry scheme is a heuristic: very thin
//! geometry combined with extreme velocities can still defeat it.

use std::mem;

use glam::DVec3;

use super::{Entity, EntityClustering, EntityId, Margins, TileId, TileTree};
use crate::consts::{MILLIMETER, RETRY_MARGIN, SIMULTANEOUS_CONTACT_TOLERANCE};
use crate::error::PhysicsError;
use crate::geometry::{
    Aabb, Sweep, distance_point_to_rectangle, sweep_sphere_to_rectangle, sweep_sphere_to_sphere,
};
use crate::settings::SceneSettings;

const SAFETY_FACTOR: f64 = 1.1;
const SAFETY_DISTANCE: f64 = MILLIMETER;
/// Retry passes shorter than this are skipped
const MIN_RETRY_DISTANCE: f64 = 0.1 * MILLIMETER;
/// Entity pushes are capped at this multiple of the relative speed
const OVERSHOOT_LIMIT: f64 = 2.0;
/// Per-second velocity loss at full friction
const FRICTION_RATE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContactId {
    Tile(TileId),
    Entity(EntityId),
}

#[derive(Debug, Clone, Copy)]
enum Other {
    Tile,
    Entity { slot: usize, mass: f64 },
}

/// A predicted contact along the current displacement
#[derive(Debug, Clone, Copy)]
struct Intersection {
    /// Own centre at the moment of contact
    sphere: DVec3,
    /// Closest point on the tile, or the other entity's centre
    target: DVec3,
    /// Centre distance at which the two touch
    radius: f64,
    /// Travel until the contact
    delta: f64,
    bounce: f64,
    friction: f64,
    id: ContactId,
    other: Other,
}

impl Intersection {
    fn is_plausible(&self) -> bool {
        self.sphere.distance_squared(self.target) <= self.radius * self.radius * 1.1
    }

    fn is_tile(&self) -> bool {
        matches!(self.other, Other::Tile)
    }
}

/// Reusable integrator. One instance serves every entity of a scene in turn.
#[derive(Debug)]
pub(crate) struct EntityMovement {
    dt: f64,
    gravity: f64,

    intersections: Vec<Intersection>,
    proper: Vec<usize>,
    processed: Vec<ContactId>,

    tile_candidates: Vec<usize>,
    interesting_tiles: Vec<usize>,
    interesting_entities: Vec<usize>,
    current_sweep: Vec<usize>,
    next_sweep: Vec<usize>,
    margins: Margins,

    slot: usize,
    delta: DVec3,
    original_delta: f64,
    remaining_budget: f64,
}

impl EntityMovement {
    pub fn new(settings: &SceneSettings) -> Self {
        Self {
            dt: settings.dt(),
            gravity: settings.gravity,
            intersections: Vec::with_capacity(8),
            proper: Vec::with_capacity(8),
            processed: Vec::with_capacity(8),
            tile_candidates: Vec::with_capacity(16),
            interesting_tiles: Vec::with_capacity(16),
            interesting_entities: Vec::with_capacity(16),
            current_sweep: Vec::with_capacity(16),
            next_sweep: Vec::with_capacity(16),
            margins: Margins::new(),
            slot: 0,
            delta: DVec3::ZERO,
            original_delta: 0.0,
            remaining_budget: 1.0,
        }
    }

    /// Velocity with half a step of gravity applied, used for this tick's
    /// displacement and impulses
    fn current_velocity(&self, velocity: DVec3) -> DVec3 {
        velocity - DVec3::new(0.0, 0.5 * self.gravity * self.dt, 0.0)
    }

    /// Upper bound for the distance an entity can travel this tick, plus its
    /// radius and a small margin. Based on the committed velocity.
    pub fn safety_radius(&self, entity: &Entity) -> f64 {
        let step = self.current_velocity(entity.velocity) * self.dt;
        SAFETY_FACTOR * (step.abs().element_sum() + SAFETY_DISTANCE + entity.radius)
    }

    /// Run one tick for the entity in `slot`. Every entity must have been
    /// inserted into `clustering` already.
    pub fn update(
        &mut self,
        slot: usize,
        entities: &mut [Entity],
        tiles: &TileTree,
        clustering: &EntityClustering,
    ) -> Result<(), PhysicsError> {
        self.start(slot, entities);
        self.gather(entities, tiles, clustering);
        self.determine_tile_intersections(entities, tiles)?;
        self.determine_entity_intersections(entities);
        self.move_safely(false, entities, tiles)?;
        self.process_intersections(entities);

        if !self.intersections.is_empty() && self.original_delta > MIN_RETRY_DISTANCE {
            self.retry(entities, tiles)?;
        }

        self.apply_friction(entities);
        self.finish(entities);
        Ok(())
    }

    fn start(&mut self, slot: usize, entities: &mut [Entity]) {
        self.slot = slot;
        let entity = &mut entities[slot];
        entity.normal_tracker.start_tick();

        self.delta = self.current_velocity(entity.working.velocity) * self.dt;
        self.original_delta = self.delta.length();
        self.remaining_budget = 1.0;

        self.intersections.clear();
        self.proper.clear();
        self.processed.clear();
    }

    fn gather(&mut self, entities: &[Entity], tiles: &TileTree, clustering: &EntityClustering) {
        let entity = &entities[self.slot];
        let safety_radius = self.safety_radius(entity);
        let bounds = Aabb::around(entity.position, safety_radius);

        tiles.query(&bounds, &mut self.tile_candidates);
        self.interesting_tiles.clear();
        for &index in &self.tile_candidates {
            let collider = &tiles.tile(index).collider;
            if distance_point_to_rectangle(collider, entity.working.position) < safety_radius {
                self.interesting_tiles.push(index);
            }
        }

        clustering.query(self.slot, &mut self.interesting_entities);
    }

    /// Sweep against every interesting tile. Dirty tiles are retried with the
    /// shortest displacement found so far, as long as it keeps shrinking.
    fn determine_tile_intersections(
        &mut self,
        entities: &[Entity],
        tiles: &TileTree,
    ) -> Result<(), PhysicsError> {
        let entity = &entities[self.slot];
        let position = entity.working.position;

        let mut small_delta = self.delta;
        let mut small_delta_squared = small_delta.length_squared();

        self.current_sweep.clear();
        self.current_sweep.extend_from_slice(&self.interesting_tiles);
        self.next_sweep.clear();

        while !self.current_sweep.is_empty() {
            let old_small_delta_squared = small_delta_squared;
            let current_delta = small_delta;

            for &index in &self.current_sweep {
                let tile = tiles.tile(index);
                let sweep =
                    sweep_sphere_to_rectangle(position, current_delta, entity.radius, &tile.collider)?;
                match sweep {
                    Sweep::Hit { sphere, target } => {
                        let new_delta = sphere - position;
                        let new_delta_squared = new_delta.length_squared();
                        if new_delta_squared < small_delta_squared {
                            small_delta = new_delta;
                            small_delta_squared = new_delta_squared;
                        }

                        let intersection = Intersection {
                            sphere,
                            target,
                            radius: entity.radius,
                            delta: new_delta_squared.sqrt(),
                            bounce: tile.material.bounce,
                            friction: tile.material.friction,
                            id: ContactId::Tile(tile.id),
                            other: Other::Tile,
                        };
                        debug_assert!(intersection.is_plausible(), "{intersection:?}");
                        self.intersections.push(intersection);
                    }
                    Sweep::Dirty => self.next_sweep.push(index),
                    Sweep::Miss => {}
                }
            }

            if small_delta_squared == old_small_delta_squared {
                break;
            }
            mem::swap(&mut self.current_sweep, &mut self.next_sweep);
            self.next_sweep.clear();
        }

        Ok(())
    }

    /// Sweep against neighbouring entities at their current working positions
    fn determine_entity_intersections(&mut self, entities: &[Entity]) {
        let entity = &entities[self.slot];
        let position = entity.working.position;

        for &other_slot in &self.interesting_entities {
            let other = &entities[other_slot];
            let combined_radius = entity.radius + other.radius;
            let sweep = sweep_sphere_to_sphere(position, self.delta, combined_radius, other.working.position);
            if let Sweep::Hit { sphere, target } = sweep {
                let intersection = Intersection {
                    sphere,
                    target,
                    radius: combined_radius,
                    delta: sphere.distance(position),
                    bounce: other.material.bounce,
                    friction: other.material.friction,
                    id: ContactId::Entity(other.id),
                    other: Other::Entity {
                        slot: other_slot,
                        mass: other.mass(),
                    },
                };
                debug_assert!(intersection.is_plausible(), "{intersection:?}");
                self.intersections.push(intersection);
            }
        }
    }

    /// Apply the displacement, clamped to the nearest intersection (unless
    /// teleporting) and to the safety radius. Refuses to move into any
    /// candidate as a last line of defense.
    fn move_safely(
        &mut self,
        allow_teleport: bool,
        entities: &mut [Entity],
        tiles: &TileTree,
    ) -> Result<(), PhysicsError> {
        let entity = &entities[self.slot];
        let position = entity.working.position;

        if !allow_teleport {
            let nearest = self
                .intersections
                .iter()
                .min_by(|a, b| a.delta.total_cmp(&b.delta));
            if let Some(nearest) = nearest {
                self.delta = nearest.sphere - position;
            }
        }

        let safe_distance = self.safety_radius(entity) - entity.radius - SAFETY_DISTANCE;
        loop {
            let actual = (position + self.delta).distance(entity.position);
            if actual <= safe_distance {
                break;
            }
            if self.delta == DVec3::ZERO {
                return Err(PhysicsError::UnsafeMove {
                    actual,
                    safe: safe_distance,
                });
            }
            self.delta /= 2.0;
        }

        let destination = position + self.delta;
        let blocked_by_entity = self.interesting_entities.iter().any(|&other_slot| {
            let other = &entities[other_slot];
            destination.distance(other.working.position) <= entity.radius + other.radius
        });
        let blocked_by_tile = self.interesting_tiles.iter().any(|&index| {
            distance_point_to_rectangle(&tiles.tile(index).collider, destination) <= entity.radius
        });
        if blocked_by_entity || blocked_by_tile {
            return Ok(());
        }

        entities[self.slot].working.position = destination;
        Ok(())
    }

    /// Resolve the nearest contacts (and all within a millimetre of them),
    /// tiles and entities as separate groups
    fn process_intersections(&mut self, entities: &mut [Entity]) {
        let Some(min_delta) = self
            .intersections
            .iter()
            .map(|intersection| intersection.delta)
            .min_by(f64::total_cmp)
        else {
            return;
        };

        self.proper.clear();
        for (index, intersection) in self.intersections.iter().enumerate() {
            if intersection.delta <= min_delta + SIMULTANEOUS_CONTACT_TOLERANCE
                && !self.processed.contains(&intersection.id)
            {
                self.proper.push(index);
            }
        }

        self.process_group(true, entities);
        self.process_group(false, entities);
    }

    fn process_group(&mut self, tiles: bool, entities: &mut [Entity]) {
        let velocity = self.current_velocity(entities[self.slot].working.velocity);
        let Some(direction) = velocity.try_normalize() else {
            return;
        };

        let weight = |intersection: &Intersection| match contact_normal(intersection) {
            Some(normal) => (-direction.dot(normal)).max(0.0),
            None => 0.0,
        };

        let total_weight: f64 = self
            .proper
            .iter()
            .map(|&index| &self.intersections[index])
            .filter(|intersection| intersection.is_tile() == tiles)
            .map(weight)
            .sum();
        if total_weight <= 0.0 {
            return;
        }

        for position in 0..self.proper.len() {
            let intersection = self.intersections[self.proper[position]];
            if intersection.is_tile() != tiles {
                continue;
            }
            self.processed.push(intersection.id);

            let Some(normal) = contact_normal(&intersection) else {
                continue;
            };
            let factor = weight(&intersection) / total_weight;
            self.apply_impulse(entities, &intersection, normal, factor, velocity);
        }
    }

    /// Push this entity (and the other one, for entity contacts) apart along
    /// `normal`, which points from the other collider towards this entity
    fn apply_impulse(
        &self,
        entities: &mut [Entity],
        intersection: &Intersection,
        normal: DVec3,
        factor: f64,
        velocity: DVec3,
    ) {
        let entity = &mut entities[self.slot];
        entity
            .normal_tracker
            .register(factor, normal, intersection.friction);

        let mass = entity.mass();
        let bounce_constant = 1.0 + entity.material.bounce + intersection.bounce;

        match intersection.other {
            Other::Tile => {
                let approach = normal.dot(velocity);
                if approach >= 0.0 {
                    return;
                }
                entity.working.velocity -= factor * bounce_constant * approach * normal;
            }
            Other::Entity {
                slot: other_slot,
                mass: other_mass,
            } => {
                let other_velocity = self.current_velocity(entities[other_slot].working.velocity);
                let relative = velocity - other_velocity;
                let approach = normal.dot(relative);
                if approach >= 0.0 {
                    return;
                }

                let reduced_mass = mass * other_mass / (mass + other_mass);
                let mut impulse = reduced_mass * factor * bounce_constant * approach * normal;

                let push = impulse.length() / (relative.length() * other_mass);
                if push > OVERSHOOT_LIMIT {
                    impulse /= push / OVERSHOOT_LIMIT;
                }

                entities[other_slot].working.velocity += impulse / other_mass;
                entities[self.slot].working.velocity -= impulse / mass;
            }
        }
    }

    /// Spend the remaining displacement budget on at most two more passes
    fn retry(&mut self, entities: &mut [Entity], tiles: &TileTree) -> Result<(), PhysicsError> {
        self.update_retry_budget(entities);
        self.retry_step(entities, tiles)?;

        if self.remaining_budget > 0.5 {
            self.update_retry_budget(entities);
            if self.remaining_budget > 0.4 {
                self.try_margin(entities, tiles)?;
            }
            self.retry_step(entities, tiles)?;
        }
        Ok(())
    }

    fn update_retry_budget(&mut self, entities: &[Entity]) {
        let consumed = self.delta.length() / self.original_delta;
        self.remaining_budget = (self.remaining_budget - consumed).max(0.0);

        let velocity = self.current_velocity(entities[self.slot].working.velocity);
        self.delta = self.remaining_budget * velocity * self.dt;
    }

    /// Open a small gap to nearby colliders before the last pass
    fn try_margin(&mut self, entities: &mut [Entity], tiles: &TileTree) -> Result<(), PhysicsError> {
        let entity = &entities[self.slot];
        let position = entity.working.position;
        let mut target = position;

        let spheres = self.interesting_entities.iter().map(|&other| {
            let other = &entities[other];
            (other.working.position, other.radius)
        });
        let rectangles = self
            .interesting_tiles
            .iter()
            .map(|&index| &tiles.tile(index).collider);
        let moved = self
            .margins
            .create(&mut target, entity.radius, spheres, rectangles, RETRY_MARGIN);

        if moved {
            let old_destination = position + self.delta;
            self.delta = target - position;
            self.move_safely(true, entities, tiles)?;
            self.delta = old_destination - entities[self.slot].working.position;
        }
        Ok(())
    }

    fn retry_step(&mut self, entities: &mut [Entity], tiles: &TileTree) -> Result<(), PhysicsError> {
        if self.delta.length() < MIN_RETRY_DISTANCE {
            return Ok(());
        }

        self.intersections.clear();
        self.proper.clear();
        self.determine_tile_intersections(entities, tiles)?;
        self.determine_entity_intersections(entities);
        self.move_safely(false, entities, tiles)?;
        self.process_intersections(entities);
        Ok(())
    }

    /// Damp the velocity component that slides along the tracked contact normal
    fn apply_friction(&self, entities: &mut [Entity]) {
        let entity = &mut entities[self.slot];
        let Some(contact) = entity.normal_tracker.get() else {
            return;
        };

        let velocity = entity.working.velocity;
        let speed = velocity.length();
        if speed == 0.0 {
            return;
        }

        let coefficient = entity.material.friction * contact.friction;
        let opposing = (contact.normal.dot(velocity) / speed).clamp(-1.0, 1.0);
        let sliding = (1.0 - opposing * opposing).sqrt();
        let per_second = FRICTION_RATE * coefficient * sliding;
        let per_tick = 1.0 - (1.0 - per_second).powf(self.dt);
        entity.working.velocity *= 1.0 - per_tick;
    }

    fn finish(&mut self, entities: &mut [Entity]) {
        self.interesting_tiles.clear();
        self.interesting_entities.clear();

        let entity = &mut entities[self.slot];
        entity.working.velocity.y -= self.gravity * self.dt;
        entity.normal_tracker.finish_tick();
    }
}

fn contact_normal(intersection: &Intersection) -> Option<DVec3> {
    (intersection.sphere - intersection.target).try_normalize()
}
