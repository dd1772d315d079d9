//! Deferred shading demo.
//!
//! Owns the scene, the lights and every resource shared between passes,
//! and records the passes of [`deferred_graph`] in order each frame.

use std::path::Path;

use anyhow::{Context, Result};
use glam::UVec2;

use crate::camera::OrbitCamera;
use crate::config::DeferredConfig;
use crate::gpu::context::GpuContext;
use crate::gpu::deferred_passes::{
    output_format, BlitPass, DeferredBindGroups, DeferredBuffers, DeferredFrame, DeferredLayouts,
    DirectionalLightPass, GBufferPass, PointLightProxyPass, PointLightSourcePass, PointLightStencilPass,
};
use crate::gpu::mesh::{create_fullscreen_buffer, create_light_proxy_geometry, GpuMesh};
use crate::gpu::readback::FrameReadback;
use crate::gpu::targets::{GBuffer, RenderTarget};
use crate::lighting::LightAllocator;
use crate::pass_state::PassState;
use crate::render_graph::{deferred_graph, PassKind, RenderGraph};
use crate::scene::{nodes_by_material, validate_scene, SceneProvider};

struct Executors {
    gbuffer: GBufferPass,
    directional: DirectionalLightPass,
    stencil: PointLightStencilPass,
    proxy: PointLightProxyPass,
    source: PointLightSourcePass,
    blit: BlitPass,
}

pub struct DeferredShading {
    scene: Box<dyn SceneProvider>,
    config: DeferredConfig,
    camera: OrbitCamera,
    lights: LightAllocator,
    graph: RenderGraph,
    last_depth_use: Option<usize>,
    size: UVec2,
    time_ms: f32,

    gbuffer: GBuffer,
    output: RenderTarget,
    buffers: DeferredBuffers,
    bind_groups: DeferredBindGroups,
    executors: Executors,
    meshes: Vec<GpuMesh>,
    light_proxy: GpuMesh,
    fullscreen: wgpu::Buffer,
    draw_groups: Vec<(usize, Vec<usize>)>,
    readback: FrameReadback,
}

impl DeferredShading {
    pub fn new(ctx: &GpuContext, scene: Box<dyn SceneProvider>, config: &DeferredConfig, size: UVec2) -> Result<Self> {
        let config = config.sanitize();
        validate_scene(scene.as_ref())?;
        ctx.capabilities.require_float_render_targets()?;
        ctx.capabilities.require_gbuffer()?;

        let lights = LightAllocator::allocate(
            scene.lights(),
            &config.point_lights,
            &config.directional_lights,
            config.seed,
        );
        let graph = deferred_graph(lights.num_directional_lights(), lights.num_point_lights());
        graph.validate().context("Deferred shading pass list is inconsistent")?;
        log::debug!("Deferred passes: {}", graph.describe().join(", "));

        let camera = scene
            .cameras()
            .first()
            .map(|camera| OrbitCamera::from_scene_camera(camera, config.animate_camera))
            .context("Scene must contain a camera")?;

        let device = &ctx.device;
        let gbuffer = ctx.create_checked("G-Buffer", |device| GBuffer::new(device, size))?;
        let format = output_format(config.simple_gamma);
        let output = ctx.create_checked("Deferred Output", |device| RenderTarget::output(device, size, format))?;

        let mut buffers = DeferredBuffers::new(
            ctx,
            scene.mesh_nodes().len(),
            scene.materials().len(),
            lights.num_directional_lights(),
            lights.num_point_lights(),
        );
        buffers.write_materials(&ctx.queue, scene.materials())?;
        buffers.write_static_lights(&ctx.queue, &lights)?;

        let layouts = DeferredLayouts::new(device, &buffers);
        let bind_groups = DeferredBindGroups::new(device, &layouts, &buffers, &gbuffer);
        let executors = Executors {
            gbuffer: GBufferPass::new(ctx, &layouts, &PassState::gbuffer())?,
            directional: DirectionalLightPass::new(ctx, &layouts, &PassState::directional_light())?,
            stencil: PointLightStencilPass::new(ctx, &layouts, &PassState::point_light_stencil())?,
            proxy: PointLightProxyPass::new(ctx, &layouts, &PassState::point_light_proxy())?,
            source: PointLightSourcePass::new(ctx, &layouts, &PassState::point_light_source())?,
            blit: BlitPass::new(ctx, &layouts, &PassState::fullscreen(), format, config.simple_gamma)?,
        };

        let meshes = scene
            .meshes()
            .iter()
            .enumerate()
            .map(|(i, mesh)| GpuMesh::upload(device, mesh, &format!("Scene Mesh {}", i)))
            .collect();
        let draw_groups = nodes_by_material(scene.as_ref());

        log::info!(
            "Deferred shading at {}x{}: {} nodes, {} materials, {} passes per frame",
            size.x,
            size.y,
            scene.mesh_nodes().len(),
            scene.materials().len(),
            graph.len()
        );

        Ok(Self {
            last_depth_use: graph.last_depth_stencil_use(),
            scene,
            config,
            camera,
            lights,
            graph,
            size,
            time_ms: 0.0,
            gbuffer,
            output,
            buffers,
            bind_groups,
            executors,
            meshes,
            light_proxy: GpuMesh::upload(device, &create_light_proxy_geometry(), "Light Proxy"),
            fullscreen: create_fullscreen_buffer(device, "Deferred Fullscreen Triangle"),
            draw_groups,
            readback: FrameReadback::new(device, size),
        })
    }

    /// Advance animation by one frame, then render it.
    pub fn render_frame(&mut self, ctx: &GpuContext, frame_time_ms: f32) -> Result<()> {
        self.time_ms += frame_time_ms;
        self.scene.set_animation_time(self.time_ms);
        self.camera.update(frame_time_ms);
        let camera = self.camera.matrices(self.size.x, self.size.y);
        if !self.config.pause_lights {
            self.lights.animate(frame_time_ms);
        }
        self.lights
            .update_transforms(self.scene.lights(), camera.view, camera.view_projection);
        self.buffers
            .write_frame(&ctx.queue, &camera, self.size, self.scene.mesh_nodes(), &self.lights)?;

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Deferred Frame Encoder"),
        });
        let frame = DeferredFrame {
            gbuffer: &self.gbuffer,
            output: &self.output,
            buffers: &self.buffers,
            bind_groups: &self.bind_groups,
            meshes: &self.meshes,
            nodes: self.scene.mesh_nodes(),
            draw_groups: &self.draw_groups,
            light_proxy: &self.light_proxy,
            fullscreen: &self.fullscreen,
            num_point_lights: self.lights.num_point_lights(),
        };

        for (position, pass) in self.graph.passes().iter().enumerate() {
            log::trace!("Recording deferred pass '{}'", pass.name);
            let store = if Some(position) == self.last_depth_use {
                wgpu::StoreOp::Discard
            } else {
                wgpu::StoreOp::Store
            };
            let executors = &self.executors;
            match pass.kind {
                PassKind::GBuffer => executors.gbuffer.record(&mut encoder, &frame, store),
                PassKind::DirectionalLight => executors.directional.record(&mut encoder, &frame, pass.index, store),
                PassKind::PointLightStencil => executors.stencil.record(&mut encoder, &frame, pass.index, store),
                PassKind::PointLightProxy => executors.proxy.record(&mut encoder, &frame, pass.index, store),
                PassKind::PointLightSource => executors.source.record(&mut encoder, &frame, store),
                PassKind::Blit => executors.blit.record(&mut encoder, &frame),
                other => anyhow::bail!("{:?} pass '{}' in the deferred pass list", other, pass.name),
            }
        }

        self.readback.copy_from(&mut encoder, &self.output.texture);
        ctx.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    pub fn save_frame(&self, ctx: &GpuContext, path: &Path) -> Result<()> {
        self.readback.save_png(&ctx.device, path)
    }
}
