//! Offscreen textures used as attachments and pass inputs.

use glam::UVec2;

use crate::pass_state::DEPTH_STENCIL_FORMAT;

/// A texture with its default view.
pub struct RenderTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub size: UVec2,
}

impl RenderTarget {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        size: UVec2,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let size = size.max(UVec2::ONE);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            format,
            size,
        }
    }

    /// Colour target that later passes sample.
    pub fn color(device: &wgpu::Device, label: &str, size: UVec2, format: wgpu::TextureFormat) -> Self {
        Self::new(
            device,
            label,
            size,
            format,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        )
    }

    /// Colour target also writable from compute shaders.
    pub fn storage(device: &wgpu::Device, label: &str, size: UVec2, format: wgpu::TextureFormat) -> Self {
        Self::new(
            device,
            label,
            size,
            format,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING,
        )
    }

    pub fn depth_stencil(device: &wgpu::Device, label: &str, size: UVec2) -> Self {
        Self::new(
            device,
            label,
            size,
            DEPTH_STENCIL_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        )
    }

    /// Final image, copied back to the CPU after each frame.
    pub fn output(device: &wgpu::Device, size: UVec2, format: wgpu::TextureFormat) -> Self {
        Self::new(
            device,
            "Output Target",
            size,
            format,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        )
    }

    pub fn texel_size(&self) -> [f32; 2] {
        [1.0 / self.size.x as f32, 1.0 / self.size.y as f32]
    }

    /// Colour attachment that discards previous contents.
    pub fn clear_attachment(&self, color: wgpu::Color) -> wgpu::RenderPassColorAttachment<'_> {
        wgpu::RenderPassColorAttachment {
            view: &self.view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(color),
                store: wgpu::StoreOp::Store,
            },
        }
    }

    /// Colour attachment that keeps previous contents (accumulation).
    pub fn load_attachment(&self) -> wgpu::RenderPassColorAttachment<'_> {
        wgpu::RenderPassColorAttachment {
            view: &self.view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            },
        }
    }
}

/// Attachments of the deferred pipeline.
///
/// Albedo keeps specular strength in alpha, normals are view-space and
/// depth is linear view depth; together with the accumulation colour that
/// is 16 bytes per pixel. All of them only live for one frame; depth and
/// stencil are discarded once lighting is done.
pub struct GBuffer {
    pub albedo: RenderTarget,
    pub normal: RenderTarget,
    pub depth: RenderTarget,
    pub accumulation: RenderTarget,
    pub depth_stencil: RenderTarget,
}

impl GBuffer {
    pub const ALBEDO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
    pub const NORMAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgb10a2Unorm;
    pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
    pub const ACCUMULATION_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    pub const FORMATS: [wgpu::TextureFormat; 4] = [
        Self::ALBEDO_FORMAT,
        Self::NORMAL_FORMAT,
        Self::DEPTH_FORMAT,
        Self::ACCUMULATION_FORMAT,
    ];

    pub fn new(device: &wgpu::Device, size: UVec2) -> Self {
        Self {
            albedo: RenderTarget::color(device, "GBuffer Albedo", size, Self::ALBEDO_FORMAT),
            normal: RenderTarget::color(device, "GBuffer Normal", size, Self::NORMAL_FORMAT),
            depth: RenderTarget::color(device, "GBuffer Depth", size, Self::DEPTH_FORMAT),
            accumulation: RenderTarget::color(device, "Light Accumulation", size, Self::ACCUMULATION_FORMAT),
            depth_stencil: RenderTarget::depth_stencil(device, "GBuffer Depth Stencil", size),
        }
    }

    /// Depth/stencil attachment for a pass of the deferred frame.
    ///
    /// Depth is only cleared by the G-buffer pass; `StencilLoad::Clear`
    /// resets the stencil before a point light's mark pass. The last pass to
    /// use the attachment passes `StoreOp::Discard` so nothing is written back.
    pub fn depth_stencil_attachment(
        &self,
        clear_depth: bool,
        stencil: StencilLoad,
        store: wgpu::StoreOp,
    ) -> wgpu::RenderPassDepthStencilAttachment<'_> {
        wgpu::RenderPassDepthStencilAttachment {
            view: &self.depth_stencil.view,
            depth_ops: Some(wgpu::Operations {
                load: if clear_depth {
                    wgpu::LoadOp::Clear(1.0)
                } else {
                    wgpu::LoadOp::Load
                },
                store,
            }),
            stencil_ops: Some(wgpu::Operations {
                load: match stencil {
                    StencilLoad::Clear => wgpu::LoadOp::Clear(0),
                    StencilLoad::Load => wgpu::LoadOp::Load,
                },
                store,
            }),
        }
    }

    pub fn bytes_per_pixel() -> u32 {
        Self::FORMATS
            .iter()
            .filter_map(|f| f.block_copy_size(None))
            .sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StencilLoad {
    Clear,
    Load,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gbuffer_budget() {
        assert_eq!(GBuffer::bytes_per_pixel(), crate::gpu::context::GBUFFER_BYTES_PER_SAMPLE);
        assert_eq!(GBuffer::FORMATS.len() as u32, crate::gpu::context::GBUFFER_COLOR_ATTACHMENTS);
    }
}
