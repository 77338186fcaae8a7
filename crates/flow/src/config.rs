use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tower_camera::CameraConfig;
use tower_scene::SettleConfig;

/// Errors loading a [`TowerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Timeouts and impulses for the flow itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Longest wait for the dropped cube to settle before forcing it.
    pub settle_timeout_secs: f32,
    /// Longest wait for the camera to reach the focus pose.
    pub focus_timeout_secs: f32,
    /// Initial velocity given to a freshly dropped cube.
    pub drop_velocity: Vec3,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            settle_timeout_secs: 8.0,
            focus_timeout_secs: 2.5,
            drop_velocity: Vec3::new(0.0, -2.0, 0.0),
        }
    }
}

/// Every tunable of the core, one section per component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TowerConfig {
    pub settle: SettleConfig,
    pub camera: CameraConfig,
    pub flow: FlowConfig,
}

impl TowerConfig {
    /// Parse from YAML. Missing sections and fields keep their defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settle.sample_every == 0 {
            return Err(ConfigError::Invalid("settle.sample_every must be at least 1".into()));
        }
        if self.settle.debounce_samples == 0 {
            return Err(ConfigError::Invalid(
                "settle.debounce_samples must be at least 1".into(),
            ));
        }
        if self.flow.settle_timeout_secs <= 0.0 || self.flow.focus_timeout_secs <= 0.0 {
            return Err(ConfigError::Invalid("flow timeouts must be positive".into()));
        }
        if self.camera.transition_secs < 0.0 || self.camera.cooldown_secs < 0.0 {
            return Err(ConfigError::Invalid("camera durations must not be negative".into()));
        }
        Ok(())
    }
}
