//! Error types for renderer setup.
//!
//! Setup failures are fatal: the frame loop never starts if any of these is
//! returned. Per-frame GPU validation errors are logged instead (see
//! [`crate::gpu::context::GpuContext`]).

/// Fatal errors raised while building the rendering pipeline.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RenderError {
    /// A required device capability is missing.
    #[error("{0}")]
    UnsupportedFeature(String),

    /// A shader module failed validation.
    #[error("Shader '{label}' failed to compile: {message}")]
    ShaderCompilation { label: String, message: String },

    /// The loaded scene cannot be rendered.
    #[error("Invalid scene data: {0}")]
    InvalidSceneData(String),

    /// A texture, buffer or attachment could not be created.
    #[error("Resource creation failed for '{label}': {reason}")]
    ResourceCreation { label: String, reason: String },

    /// A pass reads a resource no earlier pass produced.
    #[error("Invalid render graph: {0}")]
    InvalidRenderGraph(String),

    /// A uniform field was addressed that its layout does not have.
    #[error("Uniform layout error: {0}")]
    Layout(#[from] crate::structured_buffer::LayoutError),

    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Can't acquire GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}

impl RenderError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedFeature(message.into())
    }

    pub fn invalid_scene(message: impl Into<String>) -> Self {
        Self::InvalidSceneData(message.into())
    }
}

/// Convenience alias for setup results.
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = RenderError::unsupported("Floating point framebuffer targets are not supported.");
        assert_eq!(err.to_string(), "Floating point framebuffer targets are not supported.");

        let err = RenderError::invalid_scene("The main scene to display must contain a camera.");
        assert!(err.to_string().contains("must contain a camera"));

        let err = RenderError::ShaderCompilation {
            label: "Kawase".into(),
            message: "unknown identifier".into(),
        };
        assert_eq!(err.to_string(), "Shader 'Kawase' failed to compile: unknown identifier");
    }
}
