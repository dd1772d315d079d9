//! Demo cameras.
//!
//! Two cameras drive the demos:
//! - **OrbitCamera** circles the scene camera's target at a fixed radius and
//!   height (deferred shading).
//! - **ThirdPersonCamera** looks at a point from a distance, height and
//!   azimuth (bloom).
//!
//! Both produce a [`CameraMatrices`] bundle each frame; passes only ever see
//! the evaluated matrices.

use glam::{Mat4, Vec3};

use crate::scene::SceneCamera;

/// Matrices derived from a camera for one frame.
#[derive(Clone, Copy, Debug)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub inverse_view: Mat4,
    pub inverse_view_projection: Mat4,
    pub eye: Vec3,
}

impl CameraMatrices {
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        let view_projection = projection * view;
        let inverse_view = view.inverse();
        Self {
            view,
            projection,
            view_projection,
            inverse_view,
            inverse_view_projection: view_projection.inverse(),
            eye: inverse_view.transform_point3(Vec3::ZERO),
        }
    }
}

/// Right-handed perspective with a wgpu (0..1) depth range.
pub fn perspective(fov_y: f32, width: u32, height: u32, near: f32, far: f32) -> Mat4 {
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    Mat4::perspective_rh(fov_y, aspect, near, far)
}

// ============================================================================
// Orbit camera (deferred shading)
// ============================================================================

/// Horizontal orbit radius around the target.
const ORBIT_RADIUS: f32 = 100.0;

/// Height above the target.
const ORBIT_HEIGHT: f32 = 30.0;

/// Milliseconds per radian of orbit.
const ORBIT_MS_PER_RADIAN: f32 = 5000.0;

#[derive(Clone, Debug)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub up: Vec3,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub angle: f32,
    pub animate: bool,
}

impl OrbitCamera {
    pub fn from_scene_camera(camera: &SceneCamera, animate: bool) -> Self {
        Self {
            target: camera.target,
            up: camera.up,
            fov: camera.fov,
            near: camera.near,
            far: camera.far,
            angle: 0.0,
            animate,
        }
    }

    pub fn update(&mut self, frame_time_ms: f32) {
        if self.animate {
            self.angle += frame_time_ms / ORBIT_MS_PER_RADIAN;
        }
    }

    pub fn eye(&self) -> Vec3 {
        Vec3::new(
            self.angle.sin() * ORBIT_RADIUS + self.target.x,
            self.target.y + ORBIT_HEIGHT,
            self.angle.cos() * ORBIT_RADIUS + self.target.z,
        )
    }

    pub fn matrices(&self, width: u32, height: u32) -> CameraMatrices {
        let view = Mat4::look_at_rh(self.eye(), self.target, self.up);
        CameraMatrices::new(view, perspective(self.fov, width, height, self.near, self.far))
    }
}

// ============================================================================
// Third-person camera (bloom)
// ============================================================================

#[derive(Clone, Debug)]
pub struct ThirdPersonCamera {
    pub target: Vec3,
    pub distance: f32,
    pub height: f32,
    /// Azimuth in degrees.
    pub azimuth: f32,
}

impl Default for ThirdPersonCamera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 200.0,
            height: -15.0,
            azimuth: 240.0,
        }
    }
}

impl ThirdPersonCamera {
    /// Degrees the camera orbits per frame when animating.
    pub const ORBIT_STEP_DEGREES: f32 = 0.15;

    pub fn orbit(&mut self, degrees: f32) {
        self.azimuth = (self.azimuth + degrees).rem_euclid(360.0);
    }

    pub fn eye(&self) -> Vec3 {
        let a = self.azimuth.to_radians();
        self.target + Vec3::new(a.sin() * self.distance, self.height, a.cos() * self.distance)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orbit_eye() {
        let camera = OrbitCamera {
            target: Vec3::new(1.0, 2.0, 3.0),
            up: Vec3::Y,
            fov: 0.7,
            near: 1.0,
            far: 1000.0,
            angle: 0.0,
            animate: true,
        };
        let eye = camera.eye();
        assert!((eye - Vec3::new(1.0, 32.0, 103.0)).length() < 1e-4);
    }

    #[test]
    fn test_orbit_advances_only_when_animating() {
        let mut camera = OrbitCamera::from_scene_camera(&SceneCamera::default(), false);
        camera.update(5000.0);
        assert_eq!(camera.angle, 0.0);
        camera.animate = true;
        camera.update(5000.0);
        assert!((camera.angle - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_matrices_consistent() {
        let camera = OrbitCamera::from_scene_camera(&SceneCamera::default(), false);
        let m = camera.matrices(1280, 720);
        assert!((m.eye - camera.eye()).length() < 1e-3);
        let target = m.view.transform_point3(camera.target);
        assert!(target.z < 0.0);
        let roundtrip = m.inverse_view_projection * m.view_projection;
        assert!(roundtrip.abs_diff_eq(Mat4::IDENTITY, 1e-3));
    }

    #[test]
    fn test_third_person_orbit_wraps() {
        let mut camera = ThirdPersonCamera::default();
        camera.orbit(150.0);
        assert!((camera.azimuth - 30.0).abs() < 1e-4);
        let eye = camera.eye();
        assert!((eye.y + 15.0).abs() < 1e-4);
        assert!((Vec3::new(eye.x, 0.0, eye.z).length() - 200.0).abs() < 1e-2);
    }
}
