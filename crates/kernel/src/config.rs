use realm_assets::{CRASH_BLOCK_URL, DEFAULT_AVATAR_URL};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} must be positive")]
    NotPositive(&'static str),
}

/// Session configuration. Missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Seconds between network sends of changing state.
    pub network_rate: f32,
    pub fixed_timestep: f32,
    /// Fixed steps per frame before the backlog is dropped.
    pub max_fixed_steps: u32,
    pub crash_block_url: String,
    pub default_avatar_url: String,
    /// Whether the local user may edit the world. Enables flying and
    /// disables air jumps.
    pub build_mode: bool,
    pub controller: ControllerConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            network_rate: 1.0 / 8.0,
            fixed_timestep: 1.0 / 50.0,
            max_fixed_steps: 5,
            crash_block_url: CRASH_BLOCK_URL.to_string(),
            default_avatar_url: DEFAULT_AVATAR_URL.to_string(),
            build_mode: false,
            controller: ControllerConfig::default(),
        }
    }
}

impl WorldConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the frame loop and controller divide by.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("fixed_timestep", self.fixed_timestep),
            ("network_rate", self.network_rate),
            ("controller.mass", self.controller.mass),
        ];
        for (name, value) in checks {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ConfigError::NotPositive(name));
            }
        }
        Ok(())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Local player tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub capsule_radius: f32,
    pub capsule_height: f32,
    pub mass: f32,
    pub gravity: f32,
    pub jump_height: f32,
    pub walk_speed: f32,
    pub run_speed: f32,
    /// Locomotion force per unit of target speed and mass.
    pub force_multiplier: f32,
    /// Fraction of ground-parallel velocity removed per second.
    pub drag: f32,
    /// Steepest walkable slope, degrees.
    pub slope_limit: f32,
    /// Seconds of descent before the player counts as falling.
    pub fall_debounce: f32,
    /// Vertical velocity forced when walking off an edge.
    pub edge_snap_velocity: f32,
    /// Extra vertical velocity per tick while slipping.
    pub slip_bias: f32,
    pub fly_force: f32,
    pub fly_drag: f32,
    /// Seconds between jump presses that toggle flying.
    pub double_tap_window: f32,
    /// Radians per pixel of locked pointer movement.
    pub look_speed: f32,
    /// Radians per pixel of touch pan.
    pub pan_speed: f32,
    /// Radians per second at full XR turn stick.
    pub xr_turn_speed: f32,
    pub zoom_speed: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
    /// Stick length above which the player runs.
    pub stick_run_threshold: f32,
    /// How quickly the avatar turns towards its movement, per second.
    pub turn_speed: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            capsule_radius: 0.3,
            capsule_height: 1.6,
            mass: 1.0,
            gravity: 20.0,
            jump_height: 1.5,
            walk_speed: 3.0,
            run_speed: 6.0,
            force_multiplier: 10.0,
            drag: 10.0,
            slope_limit: 60.0,
            fall_debounce: 0.1,
            edge_snap_velocity: -5.0,
            slip_bias: -0.5,
            fly_force: 100.0,
            fly_drag: 300.0,
            double_tap_window: 0.4,
            look_speed: 0.005,
            pan_speed: 0.01,
            xr_turn_speed: 2.5,
            zoom_speed: 0.5,
            min_zoom: 0.0,
            max_zoom: 8.0,
            stick_run_threshold: 0.9,
            turn_speed: 10.0,
        }
    }
}
