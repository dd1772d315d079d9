//! Bloom post-processing demo.
//!
//! Renders the statue and sky into HDR targets, blurs the thresholded
//! luminance with the selected [`BloomMode`] and composites the result.
//! The plan is rebuilt whenever the mode or blur size configuration changes.

use std::path::Path;

use anyhow::{bail, Result};
use glam::{Mat4, UVec2, Vec3};

use crate::bloom::{blur_description, blur_dimensions, environment, BloomMode, DemoCycler};
use crate::camera::{perspective, ThirdPersonCamera};
use crate::config::BloomConfig;
use crate::gpu::bloom_processor::{BloomPlan, BloomProcessor, BloomTargets, SceneFrame};
use crate::gpu::context::GpuContext;
use crate::gpu::readback::FrameReadback;

/// Statue placement: lifted onto the ground plane and scaled up.
pub fn statue_model(angle: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0)) * Mat4::from_rotation_y(angle) * Mat4::from_scale(Vec3::splat(2.2))
}

/// Inverse view-projection for the sky, ignoring the camera translation.
pub fn sky_inverse_view_projection(view: Mat4, projection: Mat4) -> Mat4 {
    let rotation = Mat4::from_mat3(glam::Mat3::from_mat4(view));
    (projection * rotation).inverse()
}

/// Selections that cannot run on the device are skipped while cycling.
fn advance_to_supported(cycler: &mut DemoCycler, processor: &BloomProcessor, frame_time_ms: f32) -> bool {
    if !cycler.advance(frame_time_ms) {
        return false;
    }
    // One step per mode is enough to leave every unsupported one.
    for _ in 0..BloomMode::COUNT {
        if processor.supports(cycler.mode) {
            break;
        }
        cycler.mode = cycler.mode.next();
        cycler.configuration = 0;
    }
    true
}

pub struct PostProcessing {
    config: BloomConfig,
    cycler: DemoCycler,
    plan: BloomPlan,
    processor: BloomProcessor,
    targets: BloomTargets,
    camera: ThirdPersonCamera,
    statue_angle: f32,
    framebuffer: UVec2,
    blur_size: UVec2,
    readback: FrameReadback,
}

impl PostProcessing {
    pub fn new(ctx: &GpuContext, config: &BloomConfig, framebuffer: UVec2) -> Result<Self> {
        let config = config.sanitize();
        ctx.capabilities.require_float_render_targets()?;

        let mode = BloomMode::from_index(config.mode).unwrap_or_default();
        let processor = BloomProcessor::new(ctx, config.bloom_only)?;
        if !processor.supports(mode) {
            bail!("Bloom mode '{}' needs compute shaders, which this device lacks", mode.title());
        }

        let blur_size = blur_dimensions(framebuffer, config.blur_downscale);
        let targets = ctx.create_checked("Bloom Targets", |device| {
            BloomTargets::new(device, framebuffer, blur_size, ctx.capabilities.compute)
        })?;
        let plan = BloomPlan::new(mode, config.blur_size, framebuffer, blur_size)?;
        let cycler = DemoCycler::new(mode, config.blur_size, config.environment);

        let mut post = Self {
            config,
            cycler,
            plan,
            processor,
            targets,
            camera: ThirdPersonCamera::default(),
            statue_angle: 0.0,
            framebuffer,
            blur_size,
            readback: FrameReadback::new(&ctx.device, framebuffer),
        };
        post.processor.prepare(&ctx.queue, &post.plan, &post.targets)?;
        post.log_selection();
        Ok(post)
    }

    fn log_selection(&self) {
        log::info!("Current blur mode: {}", self.plan.mode.title());
        log::info!(
            "Current blur size configuration: {}",
            blur_description(self.plan.mode, self.plan.configuration)
        );
        log::debug!("Bloom passes: {}", self.plan.graph.describe().join(", "));
    }

    fn update(&mut self, ctx: &GpuContext, frame_time_ms: f32) -> Result<()> {
        if self.config.auto_cycle && advance_to_supported(&mut self.cycler, &self.processor, frame_time_ms) {
            if self.cycler.mode != self.plan.mode || self.cycler.configuration != self.plan.configuration {
                self.plan = BloomPlan::new(self.cycler.mode, self.cycler.configuration, self.framebuffer, self.blur_size)?;
                self.processor.prepare(&ctx.queue, &self.plan, &self.targets)?;
                self.log_selection();
            }
        }

        if self.config.animate {
            self.statue_angle += self.config.rotate_y * 0.03 * frame_time_ms;
            self.camera.orbit(ThirdPersonCamera::ORBIT_STEP_DEGREES);
        }
        Ok(())
    }

    /// Advance animation by one frame, then render it.
    pub fn render_frame(&mut self, ctx: &GpuContext, frame_time_ms: f32) -> Result<()> {
        self.update(ctx, frame_time_ms)?;

        let environment = environment(self.cycler.environment);
        let view = self.camera.view();
        let projection = perspective(
            self.config.camera_fov,
            self.framebuffer.x,
            self.framebuffer.y,
            self.config.camera_near,
            self.config.camera_far,
        );
        self.processor.write_scene(
            &ctx.queue,
            &SceneFrame {
                model: statue_model(self.statue_angle),
                view_projection: projection * view,
                sky_inverse_view_projection: sky_inverse_view_projection(view, projection),
                exposure: environment.linear_exposure(),
                environment,
            },
        )?;

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Bloom Frame Encoder"),
        });
        self.processor.record(&ctx.device, &mut encoder, &self.plan, &self.targets)?;
        self.readback.copy_from(&mut encoder, &self.targets.output.texture);
        ctx.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    pub fn save_frame(&self, ctx: &GpuContext, path: &Path) -> Result<()> {
        self.readback.save_png(&ctx.device, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statue_model_places_origin() {
        let model = statue_model(1.3);
        let origin = model.transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(0.0, 5.0, 0.0)).length() < 1e-5);
        let top = model.transform_point3(Vec3::Y);
        assert!((top.y - 7.2).abs() < 1e-5);
    }

    #[test]
    fn test_sky_ignores_translation() {
        let projection = perspective(0.8, 320, 180, 1.0, 1000.0);
        let rotation = Mat4::from_rotation_y(0.4);
        let a = sky_inverse_view_projection(rotation, projection);
        let b = sky_inverse_view_projection(Mat4::from_translation(Vec3::new(10.0, -3.0, 7.0)) * rotation, projection);
        assert!(a.abs_diff_eq(b, 1e-4));
    }
}
