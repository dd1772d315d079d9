//! Immutable demo configuration.
//!
//! Each demo is configured once at startup from defaults, an optional JSON
//! file and command line overrides (in that order of precedence). The
//! resulting structs are passed by reference; nothing mutates them while
//! frames are being rendered.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Shared constants
// ============================================================================

/// Fixed frame time used when rendering headlessly (120 Hz).
pub const FRAME_TIME_MS: f32 = 1000.0 / 120.0;

/// Largest time step fed into procedural light integration.
pub const MAX_INTEGRATION_STEP_MS: f32 = 30.0;

/// Upper bound for the procedural light count.
pub const MAX_PROCEDURAL_POINT_LIGHTS: u32 = 512;

// ============================================================================
// Point lights
// ============================================================================

/// Parameters for scene and procedural point lights.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PointLightConfig {
    pub max_distance: f32,
    pub min_distance: f32,
    pub min_height: f32,
    pub max_height: f32,
    pub axial_velocity_change: f32,
    pub radial_velocity_change: f32,
    pub vertical_velocity_change: f32,
    pub max_axial_velocity: f32,
    pub max_radial_velocity: f32,
    pub max_vertical_velocity: f32,
    /// Scene point lights beyond this count are ignored.
    pub max_scene_point_lights: u32,
    pub num_procedural_point_lights: u32,
    pub intensity: f32,
    /// Minimum perceptible intensity, used to derive the falloff radius.
    pub min_intensity_for_cutoff: f32,
}

impl Default for PointLightConfig {
    fn default() -> Self {
        Self {
            max_distance: 40.0,
            min_distance: 20.0,
            min_height: -30.0,
            max_height: 40.0,
            axial_velocity_change: 0.01,
            radial_velocity_change: 0.003,
            vertical_velocity_change: 0.01,
            max_axial_velocity: 5.0,
            max_radial_velocity: 1.5,
            max_vertical_velocity: 5.0,
            max_scene_point_lights: 5,
            num_procedural_point_lights: 10,
            intensity: 20.0,
            min_intensity_for_cutoff: 10.0 / 255.0,
        }
    }
}

impl PointLightConfig {
    /// Clamp parameters to safe ranges.
    pub fn sanitize(&self) -> Self {
        let min_distance = self.min_distance.max(0.0);
        let min_height = self.min_height;
        Self {
            max_distance: self.max_distance.max(min_distance),
            min_distance,
            min_height,
            max_height: self.max_height.max(min_height),
            axial_velocity_change: self.axial_velocity_change.max(0.0),
            radial_velocity_change: self.radial_velocity_change.max(0.0),
            vertical_velocity_change: self.vertical_velocity_change.max(0.0),
            max_axial_velocity: self.max_axial_velocity.max(0.0),
            max_radial_velocity: self.max_radial_velocity.max(0.0),
            max_vertical_velocity: self.max_vertical_velocity.max(0.0),
            max_scene_point_lights: self.max_scene_point_lights,
            num_procedural_point_lights: self
                .num_procedural_point_lights
                .min(MAX_PROCEDURAL_POINT_LIGHTS),
            intensity: self.intensity.max(0.0),
            min_intensity_for_cutoff: self.min_intensity_for_cutoff.max(1e-4),
        }
    }

    /// Largest radius any point light can influence.
    pub fn max_radius(&self) -> f32 {
        crate::lighting::falloff_radius(self.intensity, self.min_intensity_for_cutoff)
    }
}

// ============================================================================
// Directional lights
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionalLightConfig {
    /// Add one synthetic directional light on top of the scene's.
    pub additional_directional_light: bool,
    pub intensity: f32,
    pub ambient_light_color: [f32; 4],
}

impl Default for DirectionalLightConfig {
    fn default() -> Self {
        Self {
            additional_directional_light: true,
            intensity: 0.1,
            ambient_light_color: [0.005, 0.005, 0.005, 0.0],
        }
    }
}

impl DirectionalLightConfig {
    pub fn sanitize(&self) -> Self {
        let c = self.ambient_light_color;
        Self {
            additional_directional_light: self.additional_directional_light,
            intensity: self.intensity.max(0.0),
            ambient_light_color: [c[0].max(0.0), c[1].max(0.0), c[2].max(0.0), c[3].max(0.0)],
        }
    }
}

// ============================================================================
// Deferred shading demo
// ============================================================================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferredConfig {
    pub point_lights: PointLightConfig,
    pub directional_lights: DirectionalLightConfig,
    /// Apply `pow(c, 1/2.2)` instead of the exact sRGB curve in the final blit.
    pub simple_gamma: bool,
    pub animate_camera: bool,
    pub pause_lights: bool,
    /// Seed for the procedural light generator.
    pub seed: u64,
}

impl DeferredConfig {
    pub fn sanitize(&self) -> Self {
        Self {
            point_lights: self.point_lights.sanitize(),
            directional_lights: self.directional_lights.sanitize(),
            ..self.clone()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

// ============================================================================
// Bloom demo
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    /// Index into the bloom mode list; out of range falls back to the default.
    pub mode: usize,
    /// Index into the blur size tiers; out of range falls back to the default.
    pub blur_size: usize,
    pub bloom_only: bool,
    pub environment: usize,
    pub animate: bool,
    pub camera_near: f32,
    pub camera_far: f32,
    pub camera_fov: f32,
    /// Statue rotation speed in radians per frame-millisecond scale unit.
    pub rotate_y: f32,
    /// Blur targets are 1/`blur_downscale` of the framebuffer in each dimension.
    pub blur_downscale: u32,
    /// Step through modes and blur sizes on a timer.
    pub auto_cycle: bool,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            mode: crate::bloom::BloomMode::default() as usize,
            blur_size: crate::bloom::DEFAULT_DEMO_CONFIGURATION,
            bloom_only: false,
            environment: 0,
            animate: true,
            camera_near: 1.0,
            camera_far: 1000.0,
            camera_fov: 0.8,
            rotate_y: std::f32::consts::PI / 150.0,
            blur_downscale: 4,
            auto_cycle: false,
        }
    }
}

impl BloomConfig {
    pub fn sanitize(&self) -> Self {
        let defaults = Self::default();
        let near = if self.camera_near > 0.0 {
            self.camera_near
        } else {
            defaults.camera_near
        };
        Self {
            mode: if self.mode < crate::bloom::BloomMode::COUNT {
                self.mode
            } else {
                defaults.mode
            },
            blur_size: if self.blur_size < crate::bloom::NUM_DEMO_CONFIGURATIONS {
                self.blur_size
            } else {
                defaults.blur_size
            },
            environment: if self.environment < crate::bloom::ENVIRONMENTS.len() {
                self.environment
            } else {
                defaults.environment
            },
            camera_near: near,
            camera_far: self.camera_far.max(near + 1.0),
            camera_fov: self.camera_fov.clamp(0.1, 3.0),
            blur_downscale: self.blur_downscale.clamp(1, 16),
            ..self.clone()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_light_defaults() {
        let config = PointLightConfig::default();
        assert_eq!(config.max_scene_point_lights, 5);
        assert_eq!(config.num_procedural_point_lights, 10);
        // 1.5 * sqrt(20 / (10/255))
        let expected = 1.5 * (20.0f32 * 255.0 / 10.0).sqrt();
        assert!((config.max_radius() - expected).abs() < 0.001);
    }

    #[test]
    fn test_sanitize_clamps() {
        let config = PointLightConfig {
            min_distance: 30.0,
            max_distance: 10.0,
            num_procedural_point_lights: 100_000,
            ..Default::default()
        };
        let config = config.sanitize();
        assert_eq!(config.max_distance, 30.0);
        assert_eq!(config.num_procedural_point_lights, MAX_PROCEDURAL_POINT_LIGHTS);
    }

    #[test]
    fn test_partial_json() {
        let config: DeferredConfig =
            serde_json::from_str(r#"{ "point_lights": { "intensity": 40.0 }, "seed": 7 }"#).unwrap();
        assert_eq!(config.seed, 7);
        assert!((config.point_lights.intensity - 40.0).abs() < 0.001);
        assert_eq!(config.point_lights.max_scene_point_lights, 5);
        assert!(config.directional_lights.additional_directional_light);
    }

    #[test]
    fn test_bloom_out_of_range_falls_back() {
        let config = BloomConfig {
            mode: 42,
            blur_size: 9,
            environment: 5,
            ..Default::default()
        }
        .sanitize();
        let defaults = BloomConfig::default();
        assert_eq!(config.mode, defaults.mode);
        assert_eq!(config.blur_size, defaults.blur_size);
        assert_eq!(config.environment, 0);
    }
}
