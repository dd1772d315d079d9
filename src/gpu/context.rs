//! Headless device creation and capability resolution.

use std::fmt;

use crate::error::{RenderError, RenderResult};
use crate::shader_defines;

/// Bytes per pixel the deferred G-buffer needs across its colour attachments.
pub const GBUFFER_BYTES_PER_SAMPLE: u32 = 16;

/// Colour attachments live during the G-buffer pass.
pub const GBUFFER_COLOR_ATTACHMENTS: u32 = 4;

/// How CPU-written uniform data reaches the GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferUpdateStrategy {
    /// A CPU mirror stays valid for the buffer's lifetime; each release
    /// uploads only the byte range written since the previous one.
    Persistent,
    /// Each release maps a staging region for the whole buffer and copies
    /// the mirror into it.
    Transient,
}

impl fmt::Display for BufferUpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferUpdateStrategy::Persistent => write!(f, "persistent"),
            BufferUpdateStrategy::Transient => write!(f, "transient"),
        }
    }
}

/// Device features resolved once at setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub buffer_update: BufferUpdateStrategy,
    /// Rgba16Float and R32Float can be rendered to.
    pub float_render_targets: bool,
    pub max_color_attachments: u32,
    pub max_color_attachment_bytes_per_sample: u32,
    pub uniform_offset_alignment: u32,
    pub compute: bool,
}

impl Capabilities {
    /// Resolve from adapter properties.
    ///
    /// Unified-memory adapters (integrated GPUs and CPU rasterizers) keep a
    /// persistent mirror; discrete GPUs map transiently. `strategy` overrides
    /// the choice.
    pub fn resolve(
        device_type: wgpu::DeviceType,
        float_render_targets: bool,
        limits: &wgpu::Limits,
        downlevel: &wgpu::DownlevelCapabilities,
        strategy: Option<BufferUpdateStrategy>,
    ) -> Self {
        let buffer_update = strategy.unwrap_or(match device_type {
            wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::Cpu => BufferUpdateStrategy::Persistent,
            _ => BufferUpdateStrategy::Transient,
        });
        Self {
            buffer_update,
            float_render_targets,
            max_color_attachments: limits.max_color_attachments,
            max_color_attachment_bytes_per_sample: limits.max_color_attachment_bytes_per_sample,
            uniform_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            compute: downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS),
        }
    }

    pub fn require_float_render_targets(&self) -> RenderResult<()> {
        if !self.float_render_targets {
            return Err(RenderError::unsupported(
                "Floating point framebuffer targets are not supported",
            ));
        }
        Ok(())
    }

    /// Checks the G-buffer fits in the device's colour attachment budget.
    pub fn require_gbuffer(&self) -> RenderResult<()> {
        self.require_float_render_targets()?;
        if self.max_color_attachments < GBUFFER_COLOR_ATTACHMENTS
            || self.max_color_attachment_bytes_per_sample < GBUFFER_BYTES_PER_SAMPLE
        {
            return Err(RenderError::unsupported(format!(
                "G-buffer needs {} colour attachments and {} bytes per sample (device: {} and {})",
                GBUFFER_COLOR_ATTACHMENTS,
                GBUFFER_BYTES_PER_SAMPLE,
                self.max_color_attachments,
                self.max_color_attachment_bytes_per_sample
            )));
        }
        Ok(())
    }

    pub fn require_compute(&self) -> RenderResult<()> {
        if !self.compute {
            return Err(RenderError::unsupported("Compute shaders are not supported"));
        }
        Ok(())
    }
}

/// Device, queue and resolved capabilities.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    pub capabilities: Capabilities,
}

impl GpuContext {
    /// Create a device without a surface.
    pub async fn new_headless(strategy: Option<BufferUpdateStrategy>) -> RenderResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let adapter_info = adapter.get_info();
        let float_render_targets = [wgpu::TextureFormat::Rgba16Float, wgpu::TextureFormat::R32Float]
            .iter()
            .all(|format| {
                adapter
                    .get_texture_format_features(*format)
                    .allowed_usages
                    .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
            });

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Deferred Bloom Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        device.on_uncaptured_error(Box::new(|error: wgpu::Error| {
            log::error!("GPU error: {}", error);
        }));

        let capabilities = Capabilities::resolve(
            adapter_info.device_type,
            float_render_targets,
            &device.limits(),
            &adapter.get_downlevel_capabilities(),
            strategy,
        );

        log::info!(
            "Using adapter '{}' ({:?}, {:?})",
            adapter_info.name,
            adapter_info.backend,
            adapter_info.device_type
        );
        log::info!(
            "Buffer updates: {}, float render targets: {}, uniform alignment: {}",
            capabilities.buffer_update,
            capabilities.float_render_targets,
            capabilities.uniform_offset_alignment
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
            capabilities,
        })
    }

    /// Expand `defines` into `source` and compile it, turning validation
    /// errors into [`RenderError::ShaderCompilation`].
    pub fn create_shader(&self, label: &str, source: &str, defines: &[&str]) -> RenderResult<wgpu::ShaderModule> {
        let expanded = shader_defines::preprocess(label, source, defines)?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(expanded.into()),
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RenderError::ShaderCompilation {
                label: label.to_string(),
                message: error.to_string(),
            });
        }
        log::debug!("Compiled shader '{}' {:?}", label, defines);
        Ok(module)
    }

    /// Run `build` inside a validation scope, mapping errors to resource creation failures.
    pub fn create_checked<T>(&self, label: &str, build: impl FnOnce(&wgpu::Device) -> T) -> RenderResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = build(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(RenderError::ResourceCreation {
                label: label.to_string(),
                reason: error.to_string(),
            }),
            None => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downlevel(compute: bool) -> wgpu::DownlevelCapabilities {
        let mut caps = wgpu::DownlevelCapabilities::default();
        if !compute {
            caps.flags.remove(wgpu::DownlevelFlags::COMPUTE_SHADERS);
        }
        caps
    }

    #[test]
    fn test_strategy_follows_device_type() {
        let limits = wgpu::Limits::default();
        let integrated = Capabilities::resolve(
            wgpu::DeviceType::IntegratedGpu,
            true,
            &limits,
            &downlevel(true),
            None,
        );
        assert_eq!(integrated.buffer_update, BufferUpdateStrategy::Persistent);
        let discrete =
            Capabilities::resolve(wgpu::DeviceType::DiscreteGpu, true, &limits, &downlevel(true), None);
        assert_eq!(discrete.buffer_update, BufferUpdateStrategy::Transient);
        let forced = Capabilities::resolve(
            wgpu::DeviceType::DiscreteGpu,
            true,
            &limits,
            &downlevel(true),
            Some(BufferUpdateStrategy::Persistent),
        );
        assert_eq!(forced.buffer_update, BufferUpdateStrategy::Persistent);
    }

    #[test]
    fn test_gbuffer_requirements() {
        let limits = wgpu::Limits::default();
        let caps = Capabilities::resolve(wgpu::DeviceType::Cpu, true, &limits, &downlevel(true), None);
        assert!(caps.require_gbuffer().is_ok());

        let no_float = Capabilities {
            float_render_targets: false,
            ..caps
        };
        let err = no_float.require_gbuffer().unwrap_err();
        assert_eq!(err.to_string(), "Floating point framebuffer targets are not supported");

        let narrow = Capabilities {
            max_color_attachments: 2,
            ..caps
        };
        assert!(matches!(narrow.require_gbuffer(), Err(RenderError::UnsupportedFeature(_))));
    }

    #[test]
    fn test_compute_requirement() {
        let limits = wgpu::Limits::downlevel_webgl2_defaults();
        let caps = Capabilities::resolve(wgpu::DeviceType::Other, true, &limits, &downlevel(false), None);
        assert!(caps.require_compute().is_err());
    }
}
