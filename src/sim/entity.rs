//! Moving spheres

use std::f64::consts::PI;
use std::fmt;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::Material;

/// Scene-unique entity identifier, allocated in spawn order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Mutable view of an entity handed to its attachment once per tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateParameters {
    pub position: DVec3,
    pub velocity: DVec3,
}

/// Per-entity hook invoked after collision resolution and before the tick
/// commits. Whatever it leaves in the parameters becomes the new state.
///
/// Attachments run while the scene is locked, so they must not call back
/// into the scene.
pub trait EntityAttachment: Send {
    fn on_update(&mut self, parameters: &mut UpdateParameters);
}

impl<F> EntityAttachment for F
where
    F: FnMut(&mut UpdateParameters) + Send,
{
    fn on_update(&mut self, parameters: &mut UpdateParameters) {
        self(parameters)
    }
}

/// Tick-local copy of position and velocity
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct WorkingState {
    pub position: DVec3,
    pub velocity: DVec3,
}

/// Contact-weighted average surface normal with its friction coefficient
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TrackedNormal {
    pub normal: DVec3,
    pub friction: f64,
}

/// Accumulates the contact normals an entity experiences during a tick
#[derive(Debug, Clone, Default)]
pub(crate) struct NormalTracker {
    weight: f64,
    normal_sum: DVec3,
    friction_sum: f64,
    last: Option<TrackedNormal>,
}

impl NormalTracker {
    pub fn start_tick(&mut self) {
        self.weight = 0.0;
        self.normal_sum = DVec3::ZERO;
        self.friction_sum = 0.0;
    }

    pub fn register(&mut self, weight: f64, normal: DVec3, friction: f64) {
        if weight <= 0.0 {
            return;
        }
        self.weight += weight;
        self.normal_sum += weight * normal;
        self.friction_sum += weight * friction;
    }

    fn current(&self) -> Option<TrackedNormal> {
        if self.weight <= 0.0 {
            return None;
        }
        Some(TrackedNormal {
            normal: (self.normal_sum / self.weight).normalize_or_zero(),
            friction: self.friction_sum / self.weight,
        })
    }

    /// This tick's average, falling back to the previous tick's when nothing
    /// was touched yet. Resting contacts are only detected every other tick.
    pub fn get(&self) -> Option<TrackedNormal> {
        self.current().or(self.last)
    }

    pub fn finish_tick(&mut self) {
        self.last = self.current();
    }
}

/// A simulated sphere
pub struct Entity {
    pub(crate) id: EntityId,
    pub(crate) radius: f64,
    pub(crate) material: Material,
    /// Committed state, only replaced when a tick commits
    pub(crate) position: DVec3,
    pub(crate) velocity: DVec3,
    pub(crate) previous_position: DVec3,
    pub(crate) working: WorkingState,
    pub(crate) normal_tracker: NormalTracker,
    pub(crate) attachment: Option<Box<dyn EntityAttachment>>,
    // Reserved for rotational dynamics, never integrated
    pub(crate) angle: f64,
    pub(crate) spin: f64,
}

impl Entity {
    pub(crate) fn new(
        id: EntityId,
        radius: f64,
        material: Material,
        position: DVec3,
        velocity: DVec3,
        attachment: Option<Box<dyn EntityAttachment>>,
    ) -> Self {
        Self {
            id,
            radius,
            material,
            position,
            velocity,
            previous_position: position,
            working: WorkingState { position, velocity },
            normal_tracker: NormalTracker::default(),
            attachment,
            angle: 0.0,
            spin: 0.0,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn material(&self) -> Material {
        self.material
    }

    pub fn position(&self) -> DVec3 {
        self.position
    }

    pub fn velocity(&self) -> DVec3 {
        self.velocity
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn spin(&self) -> f64 {
        self.spin
    }

    /// Mass in kg of a solid sphere
    pub fn mass(&self) -> f64 {
        4.0 / 3.0 * PI * self.radius.powi(3) * self.material.density
    }

    /// Copy committed state into the working buffers
    pub(crate) fn begin_tick(&mut self) {
        self.working = WorkingState {
            position: self.position,
            velocity: self.velocity,
        };
    }

    /// Let the attachment (if any) override the working state
    pub(crate) fn run_attachment(&mut self) {
        if let Some(attachment) = self.attachment.as_mut() {
            let mut parameters = UpdateParameters {
                position: self.working.position,
                velocity: self.working.velocity,
            };
            attachment.on_update(&mut parameters);
            self.working.position = parameters.position;
            self.working.velocity = parameters.velocity;
        }
    }

    /// Publish the working state
    pub(crate) fn commit_tick(&mut self) {
        self.previous_position = self.position;
        self.position = self.working.position;
        self.velocity = self.working.velocity;
    }

    /// Whether any coordinate lies beyond `limit`
    pub(crate) fn is_beyond(&self, limit: f64) -> bool {
        self.position.abs().max_element() > limit
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("radius", &self.radius)
            .field("material", &self.material)
            .field("position", &self.position)
            .field("velocity", &self.velocity)
            .field("has_attachment", &self.attachment.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(radius: f64) -> Entity {
        Entity::new(
            EntityId(1),
            radius,
            Material::IRON,
            DVec3::new(1.0, 2.0, 3.0),
            DVec3::new(0.0, -1.0, 0.0),
            None,
        )
    }

    #[test]
    fn test_mass_of_unit_sphere() {
        let expected = 4.0 / 3.0 * PI * Material::IRON.density;
        assert!((entity(1.0).mass() - expected).abs() < 1e-6);
        assert!((entity(0.5).mass() - expected / 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_tick_double_buffer() {
        let mut entity = entity(0.1);
        entity.begin_tick();
        entity.working.position.y = 1.5;
        // Committed state is untouched until the commit
        assert_eq!(entity.position().y, 2.0);

        entity.commit_tick();
        assert_eq!(entity.position().y, 1.5);
        assert_eq!(entity.previous_position.y, 2.0);
    }

    #[test]
    fn test_attachment_overrides_working_state() {
        let mut calls = 0;
        let mut entity = entity(0.1);
        entity.attachment = Some(Box::new(move |parameters: &mut UpdateParameters| {
            calls += 1;
            parameters.velocity = DVec3::new(5.0, 0.0, 0.0);
            assert_eq!(calls, 1);
        }));

        entity.begin_tick();
        entity.run_attachment();
        entity.commit_tick();
        assert_eq!(entity.velocity(), DVec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_beyond_limit() {
        let mut entity = entity(0.1);
        assert!(!entity.is_beyond(10.0));
        entity.position.z = -10.5;
        assert!(entity.is_beyond(10.0));
    }

    #[test]
    fn test_normal_tracker_falls_back_to_last_tick() {
        let mut tracker = NormalTracker::default();
        tracker.start_tick();
        assert_eq!(tracker.get(), None);

        tracker.register(1.0, DVec3::Y, 0.5);
        tracker.register(1.0, DVec3::X, 0.3);
        let current = tracker.get().unwrap();
        assert!((current.normal - DVec3::new(1.0, 1.0, 0.0).normalize()).length() < 1e-12);
        assert!((current.friction - 0.4).abs() < 1e-12);
        tracker.finish_tick();

        // No contact this tick: reuse the previous average
        tracker.start_tick();
        assert_eq!(tracker.get(), Some(current));
        tracker.finish_tick();

        // Two quiet ticks in a row forget it
        tracker.start_tick();
        assert_eq!(tracker.get(), None);
    }
}
