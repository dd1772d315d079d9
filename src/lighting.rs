//! Light allocation and procedural point light animation.
//!
//! Lights are allocated once when the scene is loaded:
//! - scene point lights, capped at `max_scene_point_lights`
//! - `num_procedural_point_lights` extra lights wandering around the origin
//! - scene directional lights, plus one synthetic light if configured
//!
//! Every frame the procedural lights take one bounded random-walk step and
//! all light matrices are refreshed from the new view/projection.

use glam::{Mat4, Vec3, Vec4};

use crate::config::{DirectionalLightConfig, PointLightConfig, MAX_INTEGRATION_STEP_MS};
use crate::scene::{LightType, SceneLight};

/// Velocities exceeding their maximum are scaled by this each step.
pub const VELOCITY_DAMPING: f32 = 0.8;

/// Alpha of the point light source marker colour.
pub const LIGHT_SOURCE_ALPHA: f32 = 0.8;

// ============================================================================
// Attenuation
// ============================================================================

/// Radius at which a light of `intensity` falls to zero.
///
/// Attenuation is quadratic up to `A = sqrt(intensity / min_intensity)` (where
/// the pure inverse-square term reaches `min_intensity`), then continues as a
/// straight line with matching slope which hits zero at `1.5 * A`.
pub fn falloff_radius(intensity: f32, min_intensity: f32) -> f32 {
    1.5 * quadratic_cutoff(intensity, min_intensity)
}

fn quadratic_cutoff(intensity: f32, min_intensity: f32) -> f32 {
    (intensity / min_intensity.max(f32::EPSILON)).max(0.0).sqrt()
}

/// Blended quadratic/linear attenuation at `distance`.
pub fn attenuation(intensity: f32, min_intensity: f32, distance: f32) -> f32 {
    let a = quadratic_cutoff(intensity, min_intensity);
    if a <= 0.0 {
        return 0.0;
    }
    let d = distance.max(1e-4);
    if d <= a {
        intensity / (d * d)
    } else {
        (intensity * (3.0 * a - 2.0 * d) / (a * a * a)).max(0.0)
    }
}

// ============================================================================
// Random numbers
// ============================================================================

/// Small xorshift generator, deterministic for a given seed.
#[derive(Clone, Debug)]
pub struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    pub fn new(seed: u64) -> Self {
        Self {
            // Zero is a fixed point of xorshift.
            state: if seed == 0 { 0x5DEECE66D } else { seed },
        }
    }

    /// Uniform value in `[0, 1]`.
    pub fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state as f64 / u64::MAX as f64) as f32
    }

    /// Uniform value in `[min, max]`.
    pub fn range(&mut self, min: f32, max: f32) -> f32 {
        min + (max - min) * self.next_f32()
    }
}

// ============================================================================
// Procedural motion
// ============================================================================

/// Polar-coordinate state of a procedural point light.
///
/// `axial_velocity` moves the light towards/away from the Y axis,
/// `radial_velocity` moves it around the axis and `vertical_velocity` up and
/// down. Velocities are in units per second.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProceduralMotion {
    pub distance: f32,
    pub angle: f32,
    pub height: f32,
    pub axial_velocity: f32,
    pub radial_velocity: f32,
    pub vertical_velocity: f32,
}

impl ProceduralMotion {
    pub fn random(config: &PointLightConfig, rng: &mut Xorshift64) -> Self {
        Self {
            distance: rng.range(config.min_distance, config.max_distance),
            angle: rng.range(-std::f32::consts::PI, std::f32::consts::PI),
            height: rng.range(config.min_height, config.max_height),
            axial_velocity: rng.range(-config.max_axial_velocity, config.max_axial_velocity),
            radial_velocity: rng.range(-config.max_radial_velocity, config.max_radial_velocity),
            vertical_velocity: rng.range(-config.max_vertical_velocity, config.max_vertical_velocity),
        }
    }

    /// Advance by `frame_time_ms` (clamped to [`MAX_INTEGRATION_STEP_MS`]).
    pub fn step(&mut self, config: &PointLightConfig, frame_time_ms: f32, rng: &mut Xorshift64) {
        let dt = frame_time_ms.clamp(0.0, MAX_INTEGRATION_STEP_MS);
        // Out-of-bounds lights are pushed back; the vertical bias reuses the axial maximum.
        let bias = config.max_axial_velocity * dt * 0.001;

        if self.distance < config.min_distance {
            self.axial_velocity = self.axial_velocity.abs() + bias;
        }
        if self.distance > config.max_distance {
            self.axial_velocity = -self.axial_velocity.abs() - bias;
        }
        if self.height < config.min_height {
            self.vertical_velocity = self.vertical_velocity.abs() + bias;
        }
        if self.height > config.max_height {
            self.vertical_velocity = -self.vertical_velocity.abs() - bias;
        }

        self.axial_velocity +=
            rng.range(-config.axial_velocity_change, config.axial_velocity_change) * dt;
        self.radial_velocity +=
            rng.range(-config.radial_velocity_change, config.radial_velocity_change) * dt;
        self.vertical_velocity +=
            rng.range(-config.vertical_velocity_change, config.vertical_velocity_change) * dt;

        if self.axial_velocity.abs() > config.max_axial_velocity {
            self.axial_velocity *= VELOCITY_DAMPING;
        }
        if self.radial_velocity.abs() > config.max_radial_velocity {
            self.radial_velocity *= VELOCITY_DAMPING;
        }
        if self.vertical_velocity.abs() > config.max_vertical_velocity {
            self.vertical_velocity *= VELOCITY_DAMPING;
        }

        self.distance += self.axial_velocity * dt * 0.001;
        self.angle += self.radial_velocity * dt * 0.001;
        self.height += self.vertical_velocity * dt * 0.001;
    }

    /// World-space position.
    pub fn position(&self) -> Vec3 {
        Vec3::new(
            self.angle.sin() * self.distance,
            self.height,
            self.angle.cos() * self.distance,
        )
    }
}

// ============================================================================
// Lights
// ============================================================================

/// Per-frame matrices of one point light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLightMatrices {
    /// Places the light source marker.
    pub world_view_projection: Mat4,
    /// View-space light position.
    pub view_position: Vec4,
    /// Places the light volume proxy (scaled to the light radius).
    pub proxy_world_view_projection: Mat4,
    pub proxy_world_view: Mat4,
}

impl Default for PointLightMatrices {
    fn default() -> Self {
        Self {
            world_view_projection: Mat4::IDENTITY,
            view_position: Vec4::W,
            proxy_world_view_projection: Mat4::IDENTITY,
            proxy_world_view: Mat4::IDENTITY,
        }
    }
}

impl PointLightMatrices {
    pub fn compute(translation: Mat4, radius: f32, view: Mat4, view_projection: Mat4) -> Self {
        let world_scale = translation * Mat4::from_scale(Vec3::splat(radius));
        Self {
            world_view_projection: view_projection * translation,
            view_position: (view * translation).w_axis,
            proxy_world_view_projection: view_projection * world_scale,
            proxy_world_view: view * world_scale,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PointLight {
    pub color: Vec4,
    pub source_color: Vec4,
    pub intensity: f32,
    pub radius: f32,
    /// `Some` for procedural lights.
    pub motion: Option<ProceduralMotion>,
    pub matrices: PointLightMatrices,
}

impl PointLight {
    fn from_scene(color: Vec3, config: &PointLightConfig) -> Self {
        Self {
            color: color.extend(1.0),
            source_color: color.extend(LIGHT_SOURCE_ALPHA),
            intensity: config.intensity,
            radius: config.max_radius(),
            motion: None,
            matrices: PointLightMatrices::default(),
        }
    }

    fn procedural(config: &PointLightConfig, rng: &mut Xorshift64) -> Self {
        let motion = ProceduralMotion::random(config, rng);
        let mut color = Vec3::new(rng.next_f32(), rng.next_f32(), rng.next_f32());
        // Brightest channel at 1 so every light is clearly visible.
        let max = color.max_element();
        if max > 0.0 {
            color /= max;
        } else {
            color = Vec3::ONE;
        }
        Self {
            color: color.extend(1.0),
            source_color: color.extend(LIGHT_SOURCE_ALPHA),
            intensity: config.intensity,
            radius: config.max_radius(),
            motion: Some(motion),
            matrices: PointLightMatrices::default(),
        }
    }

    pub fn is_procedural(&self) -> bool {
        self.motion.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct DirectionalLight {
    /// Colour times configured intensity.
    pub intensity: Vec4,
    pub view_direction: Vec4,
}

// ============================================================================
// Allocation
// ============================================================================

/// Owns every light of the deferred demo.
#[derive(Clone, Debug)]
pub struct LightAllocator {
    point_config: PointLightConfig,
    directional_config: DirectionalLightConfig,
    point_lights: Vec<PointLight>,
    directional_lights: Vec<DirectionalLight>,
    num_scene_point_lights: usize,
    rng: Xorshift64,
}

impl LightAllocator {
    /// Allocate lights for `scene_lights`.
    ///
    /// Point light count is `min(scene point lights, max) + procedural`;
    /// procedural lights occupy the tail of the point light list.
    pub fn allocate(
        scene_lights: &[SceneLight],
        point_config: &PointLightConfig,
        directional_config: &DirectionalLightConfig,
        seed: u64,
    ) -> Self {
        let mut rng = Xorshift64::new(seed);
        let max_scene = point_config.max_scene_point_lights as usize;

        let mut point_lights = Vec::new();
        let mut directional_lights = Vec::new();
        for light in scene_lights {
            match light.light_type {
                LightType::Point => {
                    if point_lights.len() >= max_scene {
                        continue;
                    }
                    point_lights.push(PointLight::from_scene(light.color, point_config));
                }
                LightType::Directional => directional_lights.push(DirectionalLight {
                    intensity: light.color.extend(1.0) * directional_config.intensity,
                    view_direction: Vec4::new(0.0, -1.0, 0.0, 0.0),
                }),
            }
        }
        if directional_config.additional_directional_light {
            directional_lights.push(DirectionalLight {
                intensity: Vec4::ONE * directional_config.intensity,
                view_direction: Vec4::new(0.0, -1.0, 0.0, 0.0),
            });
        }

        let num_scene_point_lights = point_lights.len();
        for _ in 0..point_config.num_procedural_point_lights {
            point_lights.push(PointLight::procedural(point_config, &mut rng));
        }

        log::info!(
            "Allocated {} point lights ({} scene, {} procedural) and {} directional lights",
            point_lights.len(),
            num_scene_point_lights,
            point_config.num_procedural_point_lights,
            directional_lights.len()
        );

        Self {
            point_config: point_config.clone(),
            directional_config: directional_config.clone(),
            point_lights,
            directional_lights,
            num_scene_point_lights,
            rng,
        }
    }

    pub fn point_lights(&self) -> &[PointLight] {
        &self.point_lights
    }

    pub fn directional_lights(&self) -> &[DirectionalLight] {
        &self.directional_lights
    }

    pub fn num_point_lights(&self) -> usize {
        self.point_lights.len()
    }

    pub fn num_directional_lights(&self) -> usize {
        self.directional_lights.len()
    }

    pub fn num_scene_point_lights(&self) -> usize {
        self.num_scene_point_lights
    }

    /// Indices of the procedural point lights.
    pub fn procedural_range(&self) -> std::ops::Range<usize> {
        self.num_scene_point_lights..self.point_lights.len()
    }

    pub fn ambient_light(&self) -> Vec4 {
        Vec4::from_array(self.directional_config.ambient_light_color)
    }

    /// Advance every procedural light by one frame.
    pub fn animate(&mut self, frame_time_ms: f32) {
        let range = self.procedural_range();
        for light in &mut self.point_lights[range] {
            if let Some(motion) = light.motion.as_mut() {
                motion.step(&self.point_config, frame_time_ms, &mut self.rng);
            }
        }
    }

    /// Refresh view-dependent light data.
    ///
    /// `scene_lights` must be the list the allocator was built from; scene
    /// lights past the cap are skipped the same way they were at allocation.
    pub fn update_transforms(&mut self, scene_lights: &[SceneLight], view: Mat4, view_projection: Mat4) {
        let radius = self.point_config.max_radius();
        let mut point = 0;
        let mut directional = 0;

        for light in scene_lights {
            match light.light_type {
                LightType::Point => {
                    if point >= self.num_scene_point_lights {
                        continue;
                    }
                    let translation = light.world;
                    self.point_lights[point].matrices =
                        PointLightMatrices::compute(translation, radius, view, view_projection);
                    point += 1;
                }
                LightType::Directional => {
                    if let Some(target) = self.directional_lights.get_mut(directional) {
                        target.view_direction = view * light.world * Vec4::new(0.0, -1.0, 0.0, 0.0);
                    }
                    directional += 1;
                }
            }
        }

        if self.directional_config.additional_directional_light {
            if let Some(light) = self.directional_lights.get_mut(directional) {
                light.view_direction = view * Vec4::new(1.0, -1.0, -0.5, 0.0).normalize();
            }
        }

        let range = self.procedural_range();
        for light in &mut self.point_lights[range] {
            if let Some(motion) = light.motion {
                let translation = Mat4::from_translation(motion.position());
                light.matrices =
                    PointLightMatrices::compute(translation, radius, view, view_projection);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene_lights(points: usize, directionals: usize) -> Vec<SceneLight> {
        let mut lights = Vec::new();
        for i in 0..points {
            lights.push(SceneLight::point(
                Vec3::new(1.0, 0.5, 0.25),
                Vec3::new(i as f32 * 3.0, 4.0, 0.0),
            ));
        }
        for _ in 0..directionals {
            lights.push(SceneLight::directional(Vec3::ONE, Mat4::IDENTITY));
        }
        lights
    }

    fn allocate(points: usize) -> LightAllocator {
        LightAllocator::allocate(
            &scene_lights(points, 1),
            &PointLightConfig::default(),
            &DirectionalLightConfig::default(),
            1,
        )
    }

    #[test]
    fn test_two_scene_lights() {
        let lights = allocate(2);
        assert_eq!(lights.num_point_lights(), 12);
        assert_eq!(lights.procedural_range(), 2..12);
        assert_eq!(lights.num_directional_lights(), 2);
    }

    #[test]
    fn test_capped_scene_lights() {
        let lights = allocate(8);
        assert_eq!(lights.num_point_lights(), 15);
        assert_eq!(lights.num_scene_point_lights(), 5);
    }

    #[test]
    fn test_cap_boundary() {
        for (points, scene) in [(4, 4), (5, 5), (6, 5)] {
            let mut lights = allocate(points);
            assert_eq!(lights.num_scene_point_lights(), scene);
            assert_eq!(lights.num_point_lights(), scene + 10);
            for (i, light) in lights.point_lights().iter().enumerate() {
                assert_eq!(light.is_procedural(), i >= scene);
            }

            // Per-frame refresh touches exactly the same lights.
            lights.update_transforms(&scene_lights(points, 1), Mat4::IDENTITY, Mat4::IDENTITY);
            let last_scene = &lights.point_lights()[scene - 1];
            let x = (scene - 1) as f32 * 3.0;
            assert!((last_scene.matrices.view_position.x - x).abs() < 0.001);
        }
    }

    #[test]
    fn test_no_additional_directional() {
        let config = DirectionalLightConfig {
            additional_directional_light: false,
            ..Default::default()
        };
        let lights = LightAllocator::allocate(
            &scene_lights(0, 0),
            &PointLightConfig::default(),
            &config,
            1,
        );
        assert_eq!(lights.num_directional_lights(), 0);
        assert_eq!(lights.num_point_lights(), 10);
    }

    #[test]
    fn test_procedural_lights_stay_in_bounds() {
        let config = PointLightConfig::default();
        let mut lights = allocate(0);
        // Worst-case overshoot: one full step at maximum speed after the bias kicks in.
        let tolerance = (config.max_axial_velocity / VELOCITY_DAMPING + 1.0) * MAX_INTEGRATION_STEP_MS * 0.001;

        for frame in 0..20_000 {
            let dt = if frame % 97 == 0 { 250.0 } else { 1000.0 / 60.0 };
            lights.animate(dt);
            for light in lights.point_lights() {
                let m = light.motion.unwrap();
                assert!(m.distance >= config.min_distance - tolerance * 20.0);
                assert!(m.distance <= config.max_distance + tolerance * 20.0);
                assert!(m.axial_velocity.abs() <= config.max_axial_velocity + config.axial_velocity_change * MAX_INTEGRATION_STEP_MS + 0.2);
                assert!(m.radial_velocity.abs() <= config.max_radial_velocity + config.radial_velocity_change * MAX_INTEGRATION_STEP_MS + 0.05);
            }
        }
    }

    #[test]
    fn test_damping() {
        let config = PointLightConfig {
            axial_velocity_change: 0.0,
            radial_velocity_change: 0.0,
            vertical_velocity_change: 0.0,
            ..Default::default()
        };
        let mut rng = Xorshift64::new(3);
        let mut motion = ProceduralMotion {
            distance: 30.0,
            angle: 0.0,
            height: 0.0,
            axial_velocity: 10.0,
            radial_velocity: 0.0,
            vertical_velocity: 0.0,
        };
        motion.step(&config, 10.0, &mut rng);
        assert!((motion.axial_velocity - 8.0).abs() < 0.001);
        assert!((motion.distance - 30.08).abs() < 0.001);
    }

    #[test]
    fn test_bias_back_into_range() {
        let config = PointLightConfig {
            axial_velocity_change: 0.0,
            ..Default::default()
        };
        let mut rng = Xorshift64::new(3);
        let mut motion = ProceduralMotion {
            distance: 50.0,
            angle: 0.0,
            height: 0.0,
            axial_velocity: 2.0,
            radial_velocity: 0.0,
            vertical_velocity: 0.0,
        };
        motion.step(&config, 10.0, &mut rng);
        assert!(motion.axial_velocity < 0.0);
        assert!(motion.distance < 50.0);
    }

    #[test]
    fn test_position() {
        let motion = ProceduralMotion {
            distance: 10.0,
            angle: std::f32::consts::FRAC_PI_2,
            height: 3.0,
            axial_velocity: 0.0,
            radial_velocity: 0.0,
            vertical_velocity: 0.0,
        };
        let p = motion.position();
        assert!((p.x - 10.0).abs() < 0.001);
        assert!((p.y - 3.0).abs() < 0.001);
        assert!(p.z.abs() < 0.001);
    }

    #[test]
    fn test_proxy_matrices() {
        let t = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let m = PointLightMatrices::compute(t, 4.0, Mat4::IDENTITY, Mat4::IDENTITY);
        assert_eq!(m.view_position, Vec4::new(1.0, 2.0, 3.0, 1.0));
        let edge = m.proxy_world_view.transform_point3(Vec3::X);
        assert!((edge - Vec3::new(5.0, 2.0, 3.0)).length() < 0.001);
    }

    #[test]
    fn test_attenuation_is_continuous() {
        let intensity: f32 = 20.0;
        let min = 10.0 / 255.0;
        let a = (intensity / min).sqrt();
        let before = attenuation(intensity, min, a - 1e-3);
        let after = attenuation(intensity, min, a + 1e-3);
        assert!((before - after).abs() < 1e-3);
        assert!((attenuation(intensity, min, a) - min).abs() < 1e-4);
        assert!(attenuation(intensity, min, falloff_radius(intensity, min)).abs() < 1e-4);
    }

    #[test]
    fn test_xorshift_range() {
        let mut rng = Xorshift64::new(0);
        for _ in 0..1000 {
            let v = rng.range(-2.0, 3.0);
            assert!((-2.0..=3.0).contains(&v));
        }
    }

    #[test]
    fn test_procedural_colour_normalized() {
        let lights = allocate(0);
        for light in lights.point_lights() {
            assert!((light.color.truncate().max_element() - 1.0).abs() < 1e-5);
            assert!((light.source_color.w - LIGHT_SOURCE_ALPHA).abs() < 1e-6);
        }
    }
}
