//! Sliding-window Gaussian blur on compute shaders.
//!
//! Each invocation walks a whole row or column. The horizontal dispatch
//! writes an intermediate storage texture and the vertical dispatch reads it
//! back, so the two directions always run in separate compute passes.

use glam::{UVec2, Vec4};

use crate::error::RenderResult;
use crate::gaussian::{GaussianKernel, MAX_GAUSSIAN_HALF_KERNEL};
use crate::gpu::context::GpuContext;
use crate::gpu::pipeline::{create_compute_pipeline, storage_texture_entry, texture_entry, uniform_entry};
use crate::gpu::targets::RenderTarget;
use crate::gpu::uniform_buffer::StructuredBuffer;
use crate::structured_buffer::{FieldDesc, GpuDataType, StructLayout};

const COMPUTE_BLUR_SHADER: &str = include_str!("shader_compute_blur.wgsl");

/// Invocations per workgroup, matching `@workgroup_size` in the shader.
pub const WORKGROUP_SIZE: u32 = 32;

/// Storage format of the compute blur textures.
pub const STORAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

pub fn compute_blur_layout(alignment: usize) -> StructLayout {
    StructLayout::new(
        vec![
            FieldDesc::new("uKernelSize", GpuDataType::UInt),
            FieldDesc::array("aWeights", GpuDataType::Vec4, MAX_GAUSSIAN_HALF_KERNEL),
        ],
        1,
        alignment,
    )
}

/// Duplicated mirrored weights packed four to a vec4.
pub fn pack_weights(kernel: &GaussianKernel) -> Vec<Vec4> {
    kernel
        .duplicated_weights()
        .chunks(4)
        .map(|chunk| {
            let mut packed = [0.0; 4];
            packed[..chunk.len()].copy_from_slice(chunk);
            Vec4::from_array(packed)
        })
        .take(MAX_GAUSSIAN_HALF_KERNEL)
        .collect()
}

/// Workgroups needed to cover `lines` rows or columns.
pub fn workgroup_count(lines: u32) -> u32 {
    lines.div_ceil(WORKGROUP_SIZE).max(1)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlurDirection {
    Horizontal,
    Vertical,
}

impl BlurDirection {
    /// Rows for a horizontal blur, columns for a vertical one.
    pub fn lines(self, size: UVec2) -> u32 {
        match self {
            BlurDirection::Horizontal => size.y,
            BlurDirection::Vertical => size.x,
        }
    }
}

pub struct ComputeBlur {
    horizontal: wgpu::ComputePipeline,
    vertical: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    uniforms: StructuredBuffer,
}

impl ComputeBlur {
    pub fn new(ctx: &GpuContext) -> RenderResult<Self> {
        ctx.capabilities.require_compute()?;
        let device = &ctx.device;
        let uniforms = StructuredBuffer::new(
            device,
            "Compute Blur Data",
            compute_blur_layout(ctx.capabilities.uniform_offset_alignment as usize),
            ctx.capabilities.buffer_update,
        );

        let compute = wgpu::ShaderStages::COMPUTE;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Compute Blur Layout"),
            entries: &[
                texture_entry(0, compute, false),
                storage_texture_entry(1, STORAGE_FORMAT),
                uniform_entry(2, compute, false, uniforms.slice_size()),
            ],
        });

        let shader = ctx.create_shader("Compute Blur Shader", COMPUTE_BLUR_SHADER, &[])?;
        let horizontal = create_compute_pipeline(device, "Compute Blur Horizontal", &shader, "cs_horizontal", &[&layout]);
        let vertical = create_compute_pipeline(device, "Compute Blur Vertical", &shader, "cs_vertical", &[&layout]);

        Ok(Self {
            horizontal,
            vertical,
            layout,
            uniforms,
        })
    }

    pub fn write_kernel(&mut self, queue: &wgpu::Queue, kernel: &GaussianKernel) -> RenderResult<()> {
        let mut mapped = self.uniforms.map(queue);
        mapped.set("uKernelSize", 0, kernel.fetch_count() as u32)?;
        for (i, weights) in pack_weights(kernel).into_iter().enumerate() {
            mapped.set_array_element("aWeights", 0, i, weights)?;
        }
        Ok(())
    }

    /// Blur `source` into `destination` along one direction.
    pub fn record(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        direction: BlurDirection,
        source: &RenderTarget,
        destination: &RenderTarget,
    ) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Compute Blur Bind Group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&destination.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniforms.buffer().as_entire_binding(),
                },
            ],
        });

        let (label, pipeline) = match direction {
            BlurDirection::Horizontal => ("Compute Blur Horizontal", &self.horizontal),
            BlurDirection::Vertical => ("Compute Blur Vertical", &self.vertical),
        };
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(workgroup_count(direction.lines(destination.size)), 1, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaussian::MINIMUM_ACCEPTABLE_COEFFICIENT;

    #[test]
    fn test_layout_matches_shader() {
        let layout = compute_blur_layout(256);
        assert_eq!(layout.field("uKernelSize").unwrap().offset, 0);
        assert_eq!(layout.field("aWeights").unwrap().offset, 16);
        assert_eq!(layout.struct_size(), 16 + 26 * 16);
    }

    #[test]
    fn test_largest_kernel_fits() {
        let kernel = GaussianKernel::generate(51, false, false, MINIMUM_ACCEPTABLE_COEFFICIENT);
        assert_eq!(kernel.fetch_count(), 51);
        let packed = pack_weights(&kernel);
        assert_eq!(packed.len(), 26);
        // 102 weights: the last vec4 carries two of them.
        assert_eq!(packed[25].z, 0.0);
        assert!(packed[25].y > 0.0);
    }

    #[test]
    fn test_packed_weights_repeat() {
        let kernel = GaussianKernel::generate(5, false, false, MINIMUM_ACCEPTABLE_COEFFICIENT);
        let flat: Vec<f32> = pack_weights(&kernel).iter().flat_map(|v| v.to_array()).collect();
        for i in 0..5 {
            assert_eq!(flat[i], flat[i + 5]);
        }
        let sum: f32 = flat[..5].iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_workgroups_cover_lines() {
        assert_eq!(workgroup_count(1), 1);
        assert_eq!(workgroup_count(32), 1);
        assert_eq!(workgroup_count(33), 2);
        assert_eq!(BlurDirection::Horizontal.lines(UVec2::new(320, 180)), 180);
        assert_eq!(BlurDirection::Vertical.lines(UVec2::new(320, 180)), 320);
    }
}
