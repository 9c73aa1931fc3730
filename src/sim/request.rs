//! Creation requests and their completion handles
//!
//! Requests can be submitted from any thread; the scene drains them at the
//! start of its next update. The returned [`Pending`] handle is polled, there
//! is no blocking wait and no cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use glam::DVec3;

use super::{EntityAttachment, Material};
use crate::geometry::Rectangle;

#[derive(Debug)]
struct PendingState<Id> {
    id: OnceLock<Id>,
    processed: AtomicBool,
}

/// Completion handle of a queued request
#[derive(Debug)]
pub struct Pending<Id> {
    state: Arc<PendingState<Id>>,
}

impl<Id> Clone for Pending<Id> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<Id: Copy> Pending<Id> {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(PendingState {
                id: OnceLock::new(),
                processed: AtomicBool::new(false),
            }),
        }
    }

    /// Whether the scene has handled the request (accepted or not)
    pub fn is_processed(&self) -> bool {
        self.state.processed.load(Ordering::Acquire)
    }

    /// The assigned id. `None` while pending, and forever when the request
    /// was rejected.
    pub fn id(&self) -> Option<Id> {
        if !self.is_processed() {
            return None;
        }
        self.state.id.get().copied()
    }

    /// Whether the request was processed and rejected
    pub fn is_rejected(&self) -> bool {
        self.is_processed() && self.state.id.get().is_none()
    }

    pub(crate) fn complete(&self, id: Option<Id>) {
        if let Some(id) = id {
            let _ = self.state.id.set(id);
        }
        self.state.processed.store(true, Ordering::Release);
    }
}

/// Request to add a sphere to a scene
pub struct EntitySpawnRequest {
    pub position: DVec3,
    pub radius: f64,
    pub material: Material,
    pub velocity: DVec3,
    pub attachment: Option<Box<dyn EntityAttachment>>,
}

impl EntitySpawnRequest {
    pub fn new(position: DVec3, radius: f64) -> Self {
        Self {
            position,
            radius,
            material: Material::default(),
            velocity: DVec3::ZERO,
            attachment: None,
        }
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_velocity(mut self, velocity: DVec3) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_attachment(mut self, attachment: impl EntityAttachment + 'static) -> Self {
        self.attachment = Some(Box::new(attachment));
        self
    }
}

impl fmt::Debug for EntitySpawnRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySpawnRequest")
            .field("position", &self.position)
            .field("radius", &self.radius)
            .field("material", &self.material)
            .field("velocity", &self.velocity)
            .field("has_attachment", &self.attachment.is_some())
            .finish()
    }
}

/// Request to add a tile to a scene
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePlaceRequest {
    pub collider: Rectangle,
    pub material: Material,
}

impl TilePlaceRequest {
    pub fn new(collider: Rectangle) -> Self {
        Self {
            collider,
            material: Material::default(),
        }
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }
}
