//! Executors for the deferred shading passes.
//!
//! Each executor owns only its pipeline. Targets, uniform buffers and bind
//! groups are shared between passes and are borrowed through a
//! [`DeferredFrame`] when a pass is recorded.

use glam::{Mat4, UVec2, Vec2, Vec4};

use crate::camera::CameraMatrices;
use crate::error::RenderResult;
use crate::gpu::context::GpuContext;
use crate::gpu::mesh::{GpuMesh, QuadVertex, Vertex};
use crate::gpu::pipeline::{create_pass_pipeline, texture_entry, uniform_entry, PipelineDesc};
use crate::gpu::targets::{GBuffer, RenderTarget, StencilLoad};
use crate::gpu::uniform_buffer::StructuredBuffer;
use crate::lighting::LightAllocator;
use crate::pass_state::PassState;
use crate::scene::{Material, MeshNode};
use crate::structured_buffer::{FieldDesc, GpuDataType, StructLayout};

const GBUFFER_SHADER: &str = include_str!("shader_gbuffer.wgsl");
const DIRECTIONAL_LIGHT_SHADER: &str = concat!(
    include_str!("shader_view_space.wgsl"),
    include_str!("shader_directional_light.wgsl")
);
const POINT_LIGHT_SHADER: &str = concat!(
    include_str!("shader_view_space.wgsl"),
    include_str!("shader_point_light.wgsl")
);
const BLIT_SHADER: &str = include_str!("shader_blit.wgsl");

// ============================================================================
// Uniform layouts
// ============================================================================

pub fn material_layout(count: usize, alignment: usize) -> StructLayout {
    StructLayout::new(
        vec![
            FieldDesc::new("fSpecularStrength", GpuDataType::Float),
            FieldDesc::new("vDiffuseColor", GpuDataType::Vec4),
        ],
        count,
        alignment,
    )
}

pub fn matrix_layout(count: usize, alignment: usize) -> StructLayout {
    StructLayout::new(
        vec![
            FieldDesc::new("mWorldViewProjectionMatrix", GpuDataType::Mat4),
            FieldDesc::new("mWorldViewMatrix", GpuDataType::Mat4),
            FieldDesc::new("mWorldViewITMatrix", GpuDataType::Mat4),
        ],
        count,
        alignment,
    )
}

/// Data the lighting shaders need to rebuild view-space positions.
pub fn scene_layout(alignment: usize) -> StructLayout {
    StructLayout::new(
        vec![
            FieldDesc::new("mInverseProjectionMatrix", GpuDataType::Mat4),
            FieldDesc::new("vViewportSize", GpuDataType::Vec2),
        ],
        1,
        alignment,
    )
}

pub fn directional_static_layout(count: usize, alignment: usize) -> StructLayout {
    StructLayout::new(
        vec![
            FieldDesc::new("vLightIntensity", GpuDataType::Vec4),
            FieldDesc::new("vAmbientLight", GpuDataType::Vec4),
        ],
        count,
        alignment,
    )
}

pub fn directional_dynamic_layout(count: usize, alignment: usize) -> StructLayout {
    StructLayout::new(
        vec![FieldDesc::new("vViewSpaceLightDirection", GpuDataType::Vec4)],
        count,
        alignment,
    )
}

pub fn point_static_layout(count: usize, alignment: usize) -> StructLayout {
    StructLayout::new(
        vec![
            FieldDesc::new("fLightIntensity", GpuDataType::Float),
            FieldDesc::new("fLightRadius", GpuDataType::Float),
            FieldDesc::new("vLightColor", GpuDataType::Vec4),
            FieldDesc::new("vLightSourceColor", GpuDataType::Vec4),
        ],
        count,
        alignment,
    )
}

pub fn point_dynamic_layout(count: usize, alignment: usize) -> StructLayout {
    StructLayout::new(
        vec![
            FieldDesc::new("mWorldViewProjectionMatrix", GpuDataType::Mat4),
            FieldDesc::new("vViewPosition", GpuDataType::Vec4),
            FieldDesc::new("mProxyWorldViewProjectionMatrix", GpuDataType::Mat4),
            FieldDesc::new("mProxyWorldViewMatrix", GpuDataType::Mat4),
        ],
        count,
        alignment,
    )
}

// ============================================================================
// Shared resources
// ============================================================================

/// Uniform buffers of the deferred frame, one dynamic slice per node,
/// material or light.
pub struct DeferredBuffers {
    pub matrices: StructuredBuffer,
    pub materials: StructuredBuffer,
    pub scene: StructuredBuffer,
    pub directional_static: StructuredBuffer,
    pub directional_dynamic: StructuredBuffer,
    pub point_static: StructuredBuffer,
    pub point_dynamic: StructuredBuffer,
}

impl DeferredBuffers {
    pub fn new(
        ctx: &GpuContext,
        num_nodes: usize,
        num_materials: usize,
        num_directional: usize,
        num_point: usize,
    ) -> Self {
        let device = &ctx.device;
        let align = ctx.capabilities.uniform_offset_alignment as usize;
        let strategy = ctx.capabilities.buffer_update;
        Self {
            matrices: StructuredBuffer::new(device, "Node Matrices", matrix_layout(num_nodes, align), strategy),
            materials: StructuredBuffer::new(device, "Materials", material_layout(num_materials, align), strategy),
            scene: StructuredBuffer::new(device, "Deferred Scene", scene_layout(align), strategy),
            directional_static: StructuredBuffer::new(
                device,
                "Directional Lights Static",
                directional_static_layout(num_directional, align),
                strategy,
            ),
            directional_dynamic: StructuredBuffer::new(
                device,
                "Directional Lights Dynamic",
                directional_dynamic_layout(num_directional, align),
                strategy,
            ),
            point_static: StructuredBuffer::new(
                device,
                "Point Lights Static",
                point_static_layout(num_point, align),
                strategy,
            ),
            point_dynamic: StructuredBuffer::new(
                device,
                "Point Lights Dynamic",
                point_dynamic_layout(num_point, align),
                strategy,
            ),
        }
    }

    pub fn write_materials(&mut self, queue: &wgpu::Queue, materials: &[Material]) -> RenderResult<()> {
        let mut mapped = self.materials.map(queue);
        for (i, material) in materials.iter().enumerate() {
            mapped.set("fSpecularStrength", i, material.specular_strength)?;
            mapped.set("vDiffuseColor", i, material.diffuse_color)?;
        }
        Ok(())
    }

    /// Light data that never changes after allocation.
    ///
    /// Ambient light is folded into the first directional light only so it
    /// is accumulated once per pixel.
    pub fn write_static_lights(&mut self, queue: &wgpu::Queue, lights: &LightAllocator) -> RenderResult<()> {
        {
            let mut mapped = self.directional_static.map(queue);
            for (i, light) in lights.directional_lights().iter().enumerate() {
                let ambient = if i == 0 { lights.ambient_light() } else { Vec4::ZERO };
                mapped.set("vLightIntensity", i, light.intensity)?;
                mapped.set("vAmbientLight", i, ambient)?;
            }
        }

        let mut mapped = self.point_static.map(queue);
        for (i, light) in lights.point_lights().iter().enumerate() {
            mapped.set("fLightIntensity", i, light.intensity)?;
            mapped.set("fLightRadius", i, light.radius)?;
            mapped.set("vLightColor", i, light.color)?;
            mapped.set("vLightSourceColor", i, light.source_color)?;
        }
        Ok(())
    }

    /// Camera-dependent data, refreshed every frame.
    pub fn write_frame(
        &mut self,
        queue: &wgpu::Queue,
        camera: &CameraMatrices,
        viewport: UVec2,
        nodes: &[MeshNode],
        lights: &LightAllocator,
    ) -> RenderResult<()> {
        {
            let mut mapped = self.scene.map(queue);
            mapped.set("mInverseProjectionMatrix", 0, camera.projection.inverse())?;
            mapped.set("vViewportSize", 0, viewport.as_vec2().max(Vec2::ONE))?;
        }

        {
            let mut mapped = self.matrices.map(queue);
            for (i, node) in nodes.iter().enumerate() {
                let world_view = camera.view * node.world;
                mapped.set("mWorldViewProjectionMatrix", i, camera.view_projection * node.world)?;
                mapped.set("mWorldViewMatrix", i, world_view)?;
                mapped.set("mWorldViewITMatrix", i, normal_matrix(world_view))?;
            }
        }

        {
            let mut mapped = self.directional_dynamic.map(queue);
            for (i, light) in lights.directional_lights().iter().enumerate() {
                mapped.set("vViewSpaceLightDirection", i, light.view_direction)?;
            }
        }

        let mut mapped = self.point_dynamic.map(queue);
        for (i, light) in lights.point_lights().iter().enumerate() {
            let m = &light.matrices;
            mapped.set("mWorldViewProjectionMatrix", i, m.world_view_projection)?;
            mapped.set("vViewPosition", i, m.view_position)?;
            mapped.set("mProxyWorldViewProjectionMatrix", i, m.proxy_world_view_projection)?;
            mapped.set("mProxyWorldViewMatrix", i, m.proxy_world_view)?;
        }
        Ok(())
    }
}

/// Inverse transpose, for transforming normals.
fn normal_matrix(world_view: Mat4) -> Mat4 {
    world_view.inverse().transpose()
}

/// Bind group layouts shared by the deferred pipelines.
pub struct DeferredLayouts {
    pub matrix: wgpu::BindGroupLayout,
    pub material: wgpu::BindGroupLayout,
    pub gbuffer: wgpu::BindGroupLayout,
    pub directional: wgpu::BindGroupLayout,
    pub point: wgpu::BindGroupLayout,
    pub blit: wgpu::BindGroupLayout,
}

impl DeferredLayouts {
    pub fn new(device: &wgpu::Device, buffers: &DeferredBuffers) -> Self {
        let vertex = wgpu::ShaderStages::VERTEX;
        let fragment = wgpu::ShaderStages::FRAGMENT;
        let both = wgpu::ShaderStages::VERTEX_FRAGMENT;

        let matrix = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Node Matrices Layout"),
            entries: &[uniform_entry(0, vertex, true, buffers.matrices.slice_size())],
        });
        let material = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material Layout"),
            entries: &[uniform_entry(0, fragment, true, buffers.materials.slice_size())],
        });
        let gbuffer = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GBuffer Read Layout"),
            entries: &[
                texture_entry(0, fragment, false),
                texture_entry(1, fragment, false),
                texture_entry(2, fragment, false),
                uniform_entry(3, fragment, false, buffers.scene.slice_size()),
            ],
        });
        let directional = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Directional Light Layout"),
            entries: &[
                uniform_entry(0, fragment, true, buffers.directional_static.slice_size()),
                uniform_entry(1, fragment, true, buffers.directional_dynamic.slice_size()),
            ],
        });
        let point = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Point Light Layout"),
            entries: &[
                uniform_entry(0, both, true, buffers.point_static.slice_size()),
                uniform_entry(1, both, true, buffers.point_dynamic.slice_size()),
            ],
        });
        let blit = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Layout"),
            entries: &[texture_entry(0, fragment, false)],
        });

        Self {
            matrix,
            material,
            gbuffer,
            directional,
            point,
            blit,
        }
    }
}

pub struct DeferredBindGroups {
    pub matrix: wgpu::BindGroup,
    pub material: wgpu::BindGroup,
    pub gbuffer: wgpu::BindGroup,
    pub directional: wgpu::BindGroup,
    pub point: wgpu::BindGroup,
    pub blit: wgpu::BindGroup,
}

impl DeferredBindGroups {
    pub fn new(
        device: &wgpu::Device,
        layouts: &DeferredLayouts,
        buffers: &DeferredBuffers,
        gbuffer: &GBuffer,
    ) -> Self {
        let single = |label: &str, layout: &wgpu::BindGroupLayout, buffer: &StructuredBuffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.slice_binding(),
                }],
            })
        };
        let pair = |label: &str, layout: &wgpu::BindGroupLayout, a: &StructuredBuffer, b: &StructuredBuffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: a.slice_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: b.slice_binding(),
                    },
                ],
            })
        };

        let gbuffer_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GBuffer Read Bind Group"),
            layout: &layouts.gbuffer,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&gbuffer.albedo.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&gbuffer.normal.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&gbuffer.depth.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: buffers.scene.slice_binding(),
                },
            ],
        });
        let blit = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blit Bind Group"),
            layout: &layouts.blit,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&gbuffer.accumulation.view),
            }],
        });

        Self {
            matrix: single("Node Matrices Bind Group", &layouts.matrix, &buffers.matrices),
            material: single("Material Bind Group", &layouts.material, &buffers.materials),
            gbuffer: gbuffer_group,
            directional: pair(
                "Directional Light Bind Group",
                &layouts.directional,
                &buffers.directional_static,
                &buffers.directional_dynamic,
            ),
            point: pair(
                "Point Light Bind Group",
                &layouts.point,
                &buffers.point_static,
                &buffers.point_dynamic,
            ),
            blit,
        }
    }
}

/// Everything a deferred pass borrows while it is recorded.
pub struct DeferredFrame<'a> {
    pub gbuffer: &'a GBuffer,
    pub output: &'a RenderTarget,
    pub buffers: &'a DeferredBuffers,
    pub bind_groups: &'a DeferredBindGroups,
    pub meshes: &'a [GpuMesh],
    pub nodes: &'a [MeshNode],
    /// Node indices grouped by material.
    pub draw_groups: &'a [(usize, Vec<usize>)],
    pub light_proxy: &'a GpuMesh,
    pub fullscreen: &'a wgpu::Buffer,
    pub num_point_lights: usize,
}

impl DeferredFrame<'_> {
    fn directional_offsets(&self, index: usize) -> [u32; 2] {
        [
            self.buffers.directional_static.dynamic_offset(index),
            self.buffers.directional_dynamic.dynamic_offset(index),
        ]
    }

    fn point_offsets(&self, index: usize) -> [u32; 2] {
        [
            self.buffers.point_static.dynamic_offset(index),
            self.buffers.point_dynamic.dynamic_offset(index),
        ]
    }

    fn accumulate<'e>(
        &self,
        encoder: &'e mut wgpu::CommandEncoder,
        label: &str,
        stencil: StencilLoad,
        store: wgpu::StoreOp,
    ) -> wgpu::RenderPass<'e> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(self.gbuffer.accumulation.load_attachment())],
            depth_stencil_attachment: Some(self.gbuffer.depth_stencil_attachment(false, stencil, store)),
            timestamp_writes: None,
            occlusion_query_set: None,
        })
    }
}

// ============================================================================
// Executors
// ============================================================================

/// Fills the G-buffer and marks geometry pixels in the stencil.
pub struct GBufferPass {
    pipeline: wgpu::RenderPipeline,
    stencil_reference: u32,
}

impl GBufferPass {
    pub fn new(ctx: &GpuContext, layouts: &DeferredLayouts, state: &PassState) -> RenderResult<Self> {
        let shader = ctx.create_shader("GBuffer Shader", GBUFFER_SHADER, &[])?;
        let pipeline = create_pass_pipeline(
            &ctx.device,
            &PipelineDesc {
                label: "GBuffer Pipeline",
                shader: &shader,
                vertex_entry: "vs_main",
                fragment_entry: "fs_main",
                vertex_buffers: &[Vertex::desc()],
                bind_group_layouts: &[&layouts.matrix, &layouts.material],
                targets: &GBuffer::FORMATS,
                state,
            },
        );
        Ok(Self {
            pipeline,
            stencil_reference: state.stencil_reference(),
        })
    }

    pub fn record(&self, encoder: &mut wgpu::CommandEncoder, frame: &DeferredFrame, store: wgpu::StoreOp) {
        let gbuffer = frame.gbuffer;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("GBuffer Pass"),
            color_attachments: &[
                Some(gbuffer.albedo.clear_attachment(wgpu::Color::TRANSPARENT)),
                Some(gbuffer.normal.clear_attachment(wgpu::Color::TRANSPARENT)),
                Some(gbuffer.depth.clear_attachment(wgpu::Color::TRANSPARENT)),
                Some(gbuffer.accumulation.clear_attachment(wgpu::Color::BLACK)),
            ],
            depth_stencil_attachment: Some(gbuffer.depth_stencil_attachment(true, StencilLoad::Clear, store)),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_stencil_reference(self.stencil_reference);

        for (material, node_indices) in frame.draw_groups {
            pass.set_bind_group(1, &frame.bind_groups.material, &[frame.buffers.materials.dynamic_offset(*material)]);
            for &index in node_indices {
                let node = &frame.nodes[index];
                pass.set_bind_group(0, &frame.bind_groups.matrix, &[frame.buffers.matrices.dynamic_offset(index)]);
                frame.meshes[node.mesh].draw(&mut pass);
            }
        }
    }
}

/// Adds one directional light to every geometry pixel.
pub struct DirectionalLightPass {
    pipeline: wgpu::RenderPipeline,
    stencil_reference: u32,
}

impl DirectionalLightPass {
    pub fn new(ctx: &GpuContext, layouts: &DeferredLayouts, state: &PassState) -> RenderResult<Self> {
        let shader = ctx.create_shader("Directional Light Shader", DIRECTIONAL_LIGHT_SHADER, &[])?;
        let pipeline = create_pass_pipeline(
            &ctx.device,
            &PipelineDesc {
                label: "Directional Light Pipeline",
                shader: &shader,
                vertex_entry: "vs_main",
                fragment_entry: "fs_main",
                vertex_buffers: &[QuadVertex::desc()],
                bind_group_layouts: &[&layouts.gbuffer, &layouts.directional],
                targets: &[GBuffer::ACCUMULATION_FORMAT],
                state,
            },
        );
        Ok(Self {
            pipeline,
            stencil_reference: state.stencil_reference(),
        })
    }

    pub fn record(&self, encoder: &mut wgpu::CommandEncoder, frame: &DeferredFrame, index: usize, store: wgpu::StoreOp) {
        let mut pass = frame.accumulate(encoder, "Directional Light Pass", StencilLoad::Load, store);
        pass.set_pipeline(&self.pipeline);
        pass.set_stencil_reference(self.stencil_reference);
        pass.set_bind_group(0, &frame.bind_groups.gbuffer, &[]);
        pass.set_bind_group(1, &frame.bind_groups.directional, &frame.directional_offsets(index));
        pass.set_vertex_buffer(0, frame.fullscreen.slice(..));
        pass.draw(0..3, 0..1);
    }
}

/// Marks, in a freshly cleared stencil, where geometry hides the front of a light volume.
pub struct PointLightStencilPass {
    pipeline: wgpu::RenderPipeline,
    stencil_reference: u32,
}

impl PointLightStencilPass {
    pub fn new(ctx: &GpuContext, layouts: &DeferredLayouts, state: &PassState) -> RenderResult<Self> {
        let shader = ctx.create_shader("Point Light Stencil Shader", POINT_LIGHT_SHADER, &[])?;
        let pipeline = create_pass_pipeline(
            &ctx.device,
            &PipelineDesc {
                label: "Point Light Stencil Pipeline",
                shader: &shader,
                vertex_entry: "vs_proxy",
                fragment_entry: "fs_stencil",
                vertex_buffers: &[Vertex::position_only_desc()],
                bind_group_layouts: &[&layouts.point],
                targets: &[GBuffer::ACCUMULATION_FORMAT],
                state,
            },
        );
        Ok(Self {
            pipeline,
            stencil_reference: state.stencil_reference(),
        })
    }

    pub fn record(&self, encoder: &mut wgpu::CommandEncoder, frame: &DeferredFrame, index: usize, store: wgpu::StoreOp) {
        let mut pass = frame.accumulate(encoder, "Point Light Stencil Pass", StencilLoad::Clear, store);
        pass.set_pipeline(&self.pipeline);
        pass.set_stencil_reference(self.stencil_reference);
        pass.set_bind_group(0, &frame.bind_groups.point, &frame.point_offsets(index));
        frame.light_proxy.draw(&mut pass);
    }
}

/// Lights the pixels inside one light volume.
pub struct PointLightProxyPass {
    pipeline: wgpu::RenderPipeline,
    stencil_reference: u32,
}

impl PointLightProxyPass {
    pub fn new(ctx: &GpuContext, layouts: &DeferredLayouts, state: &PassState) -> RenderResult<Self> {
        let shader = ctx.create_shader("Point Light Proxy Shader", POINT_LIGHT_SHADER, &[])?;
        let pipeline = create_pass_pipeline(
            &ctx.device,
            &PipelineDesc {
                label: "Point Light Proxy Pipeline",
                shader: &shader,
                vertex_entry: "vs_proxy",
                fragment_entry: "fs_proxy",
                vertex_buffers: &[Vertex::position_only_desc()],
                bind_group_layouts: &[&layouts.point, &layouts.gbuffer],
                targets: &[GBuffer::ACCUMULATION_FORMAT],
                state,
            },
        );
        Ok(Self {
            pipeline,
            stencil_reference: state.stencil_reference(),
        })
    }

    pub fn record(&self, encoder: &mut wgpu::CommandEncoder, frame: &DeferredFrame, index: usize, store: wgpu::StoreOp) {
        let mut pass = frame.accumulate(encoder, "Point Light Proxy Pass", StencilLoad::Load, store);
        pass.set_pipeline(&self.pipeline);
        pass.set_stencil_reference(self.stencil_reference);
        pass.set_bind_group(0, &frame.bind_groups.point, &frame.point_offsets(index));
        pass.set_bind_group(1, &frame.bind_groups.gbuffer, &[]);
        frame.light_proxy.draw(&mut pass);
    }
}

/// Draws a small translucent marker at every point light.
pub struct PointLightSourcePass {
    pipeline: wgpu::RenderPipeline,
}

impl PointLightSourcePass {
    pub fn new(ctx: &GpuContext, layouts: &DeferredLayouts, state: &PassState) -> RenderResult<Self> {
        let shader = ctx.create_shader("Point Light Source Shader", POINT_LIGHT_SHADER, &[])?;
        let pipeline = create_pass_pipeline(
            &ctx.device,
            &PipelineDesc {
                label: "Point Light Source Pipeline",
                shader: &shader,
                vertex_entry: "vs_source",
                fragment_entry: "fs_source",
                vertex_buffers: &[Vertex::position_only_desc()],
                bind_group_layouts: &[&layouts.point],
                targets: &[GBuffer::ACCUMULATION_FORMAT],
                state,
            },
        );
        Ok(Self { pipeline })
    }

    pub fn record(&self, encoder: &mut wgpu::CommandEncoder, frame: &DeferredFrame, store: wgpu::StoreOp) {
        let mut pass = frame.accumulate(encoder, "Point Light Source Pass", StencilLoad::Load, store);
        pass.set_pipeline(&self.pipeline);
        for i in 0..frame.num_point_lights {
            pass.set_bind_group(0, &frame.bind_groups.point, &frame.point_offsets(i));
            frame.light_proxy.draw(&mut pass);
        }
    }
}

/// Copies the accumulated lighting to the output image.
pub struct BlitPass {
    pipeline: wgpu::RenderPipeline,
}

impl BlitPass {
    /// With `simple_gamma` the shader applies `pow(c, 1/2.2)` and the output
    /// must be a linear format; otherwise the sRGB output encodes on store.
    pub fn new(
        ctx: &GpuContext,
        layouts: &DeferredLayouts,
        state: &PassState,
        output_format: wgpu::TextureFormat,
        simple_gamma: bool,
    ) -> RenderResult<Self> {
        let defines: &[&str] = if simple_gamma { &["SIMPLE_GAMMA"] } else { &[] };
        let shader = ctx.create_shader("Blit Shader", BLIT_SHADER, defines)?;
        let pipeline = create_pass_pipeline(
            &ctx.device,
            &PipelineDesc {
                label: "Blit Pipeline",
                shader: &shader,
                vertex_entry: "vs_main",
                fragment_entry: "fs_main",
                vertex_buffers: &[QuadVertex::desc()],
                bind_group_layouts: &[&layouts.blit],
                targets: &[output_format],
                state,
            },
        );
        Ok(Self { pipeline })
    }

    pub fn record(&self, encoder: &mut wgpu::CommandEncoder, frame: &DeferredFrame) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Blit Pass"),
            color_attachments: &[Some(frame.output.clear_attachment(wgpu::Color::BLACK))],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &frame.bind_groups.blit, &[]);
        pass.set_vertex_buffer(0, frame.fullscreen.slice(..));
        pass.draw(0..3, 0..1);
    }
}

/// Output format for the final blit.
pub fn output_format(simple_gamma: bool) -> wgpu::TextureFormat {
    if simple_gamma {
        wgpu::TextureFormat::Rgba8Unorm
    } else {
        wgpu::TextureFormat::Rgba8UnormSrgb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(layout: &StructLayout) -> Vec<usize> {
        layout.fields().iter().map(|f| f.offset).collect()
    }

    // Offsets and sizes must match the WGSL structs in the shaders.
    #[test]
    fn test_layouts_match_shaders() {
        let material = material_layout(3, 256);
        assert_eq!(offsets(&material), vec![0, 16]);
        assert_eq!(material.struct_size(), 32);

        let matrices = matrix_layout(1, 256);
        assert_eq!(offsets(&matrices), vec![0, 64, 128]);
        assert_eq!(matrices.struct_size(), 192);

        let scene = scene_layout(256);
        assert_eq!(offsets(&scene), vec![0, 64]);
        assert_eq!(scene.struct_size(), 80);

        let point_static = point_static_layout(1, 256);
        assert_eq!(offsets(&point_static), vec![0, 4, 16, 32]);
        assert_eq!(point_static.struct_size(), 48);

        let point_dynamic = point_dynamic_layout(1, 256);
        assert_eq!(offsets(&point_dynamic), vec![0, 64, 80, 144]);
        assert_eq!(point_dynamic.struct_size(), 208);

        assert_eq!(directional_static_layout(1, 256).struct_size(), 32);
        assert_eq!(directional_dynamic_layout(1, 256).struct_size(), 16);
    }

    #[test]
    fn test_lighting_shaders_share_view_space() {
        for source in [DIRECTIONAL_LIGHT_SHADER, POINT_LIGHT_SHADER] {
            assert_eq!(source.matches("fn view_position(").count(), 1);
            assert_eq!(source.matches("struct SceneData").count(), 1);
            assert!(source.contains("var<uniform> scene: SceneData;"));
        }
        for own in [
            include_str!("shader_directional_light.wgsl"),
            include_str!("shader_point_light.wgsl"),
        ] {
            assert!(!own.contains("fn view_position("));
        }
    }

    #[test]
    fn test_one_slice_per_light() {
        let layout = point_dynamic_layout(15, 256);
        assert_eq!(layout.slice_count(), 15);
        assert_eq!(layout.dynamic_slice_offset(14), 14 * 256);
        // No lights still yields a bindable buffer.
        assert_eq!(directional_static_layout(0, 256).slice_count(), 1);
    }

    #[test]
    fn test_normal_matrix() {
        let world_view = Mat4::from_scale(glam::Vec3::new(2.0, 1.0, 1.0));
        let n = normal_matrix(world_view);
        assert!((n.x_axis.x - 0.5).abs() < 1e-6);
        assert!((n.y_axis.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_output_format() {
        assert!(!output_format(true).is_srgb());
        assert!(output_format(false).is_srgb());
    }
}
