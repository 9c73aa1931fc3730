//! Scene settings
//!
//! Loaded from JSON (all fields optional, missing ones take the defaults in
//! `crate::consts`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts::{GRAVITY, SPAWN_MARGIN, STEP_DURATION, WORLD_LIMIT};
use crate::error::SettingsError;

/// Tunable parameters of a [`crate::Scene`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneSettings {
    /// Fixed simulation step in milliseconds
    pub step_millis: u64,
    /// Downward gravitational acceleration (m/s²)
    pub gravity: f64,
    /// Entities leaving the cube [-limit, limit]³ are destroyed
    pub world_limit: f64,
    /// Gap the margin solver tries to open around newly spawned entities
    pub spawn_margin: f64,
    /// Upper bound (in steps) for simple extrapolation of snapshots
    pub max_extrapolation_steps: f64,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            step_millis: STEP_DURATION.as_millis() as u64,
            gravity: GRAVITY,
            world_limit: WORLD_LIMIT,
            spawn_margin: SPAWN_MARGIN,
            max_extrapolation_steps: 1.0,
        }
    }
}

impl SceneSettings {
    /// Parse settings from a JSON document
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let settings = Self::from_json(&json)?;
        log::info!("Loaded scene settings from {}", path.as_ref().display());
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.step_millis == 0 {
            return Err(SettingsError::Invalid("step_millis must be positive".into()));
        }
        if !self.gravity.is_finite() || self.gravity < 0.0 {
            return Err(SettingsError::Invalid(format!(
                "gravity must be finite and non-negative, got {}",
                self.gravity
            )));
        }
        if !(self.world_limit > 0.0) {
            return Err(SettingsError::Invalid(format!(
                "world_limit must be positive, got {}",
                self.world_limit
            )));
        }
        if !(self.spawn_margin >= 0.0) {
            return Err(SettingsError::Invalid("spawn_margin must be non-negative".into()));
        }
        if !(self.max_extrapolation_steps >= 0.0) {
            return Err(SettingsError::Invalid(
                "max_extrapolation_steps must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Fixed step as a duration
    pub fn step_duration(&self) -> Duration {
        Duration::from_millis(self.step_millis)
    }

    /// Fixed step in seconds
    #[inline]
    pub fn dt(&self) -> f64 {
        self.step_duration().as_secs_f64()
    }
}
