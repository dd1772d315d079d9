//! Fixed-function state of every pass type.
//!
//! States are plain data so they can be inspected and tested without a
//! device; pipelines are built from them through the `*_state` converters.

use wgpu::{
    BlendComponent, BlendFactor, BlendOperation, BlendState, ColorTargetState, ColorWrites,
    CompareFunction, DepthBiasState, DepthStencilState, Face, FrontFace, PrimitiveState,
    PrimitiveTopology, StencilFaceState, StencilOperation, StencilState, TextureFormat,
};

/// Format of the shared depth/stencil attachment.
pub const DEPTH_STENCIL_FORMAT: TextureFormat = TextureFormat::Depth24PlusStencil8;

/// Stencil value written wherever geometry was rasterized.
pub const GEOMETRY_STENCIL_REFERENCE: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Blend {
    Replace,
    /// `dst + src`, used for light accumulation.
    Additive,
    /// `src * a + dst * (1 - a)`.
    Alpha,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StencilTest {
    pub compare: CompareFunction,
    pub fail_op: StencilOperation,
    pub depth_fail_op: StencilOperation,
    pub pass_op: StencilOperation,
    pub reference: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthStencilTest {
    pub depth_compare: CompareFunction,
    pub depth_write: bool,
    pub stencil: Option<StencilTest>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassState {
    /// `None` for passes without a depth/stencil attachment.
    pub depth_stencil: Option<DepthStencilTest>,
    pub cull_mode: Option<Face>,
    pub front_face: FrontFace,
    pub blend: Blend,
    pub color_writes: ColorWrites,
}

impl PassState {
    /// Full-screen pass without depth or stencil.
    pub const fn fullscreen() -> Self {
        Self {
            depth_stencil: None,
            cull_mode: None,
            front_face: FrontFace::Ccw,
            blend: Blend::Replace,
            color_writes: ColorWrites::ALL,
        }
    }

    /// G-buffer fill: depth tested and written, stencil set to 1 under geometry.
    pub const fn gbuffer() -> Self {
        Self {
            depth_stencil: Some(DepthStencilTest {
                depth_compare: CompareFunction::Less,
                depth_write: true,
                stencil: Some(StencilTest {
                    compare: CompareFunction::Always,
                    fail_op: StencilOperation::Keep,
                    depth_fail_op: StencilOperation::Keep,
                    pass_op: StencilOperation::Replace,
                    reference: GEOMETRY_STENCIL_REFERENCE,
                }),
            }),
            cull_mode: Some(Face::Back),
            front_face: FrontFace::Ccw,
            blend: Blend::Replace,
            color_writes: ColorWrites::ALL,
        }
    }

    /// Directional light: full-screen triangle restricted to geometry pixels.
    ///
    /// The triangle is wound counter-clockwise but the pipeline treats
    /// clockwise as front and culls front faces, so only its back face is
    /// rasterized.
    pub const fn directional_light() -> Self {
        Self {
            depth_stencil: Some(DepthStencilTest {
                depth_compare: CompareFunction::Always,
                depth_write: false,
                stencil: Some(StencilTest {
                    compare: CompareFunction::Equal,
                    fail_op: StencilOperation::Keep,
                    depth_fail_op: StencilOperation::Keep,
                    pass_op: StencilOperation::Keep,
                    reference: GEOMETRY_STENCIL_REFERENCE,
                }),
            }),
            cull_mode: Some(Face::Front),
            front_face: FrontFace::Cw,
            blend: Blend::Additive,
            color_writes: ColorWrites::ALL,
        }
    }

    /// Point light stencil mark: front faces of the proxy, incrementing
    /// stencil where existing geometry occludes them.
    pub const fn point_light_stencil() -> Self {
        Self {
            depth_stencil: Some(DepthStencilTest {
                depth_compare: CompareFunction::LessEqual,
                depth_write: false,
                stencil: Some(StencilTest {
                    compare: CompareFunction::Always,
                    fail_op: StencilOperation::Keep,
                    depth_fail_op: StencilOperation::IncrementClamp,
                    pass_op: StencilOperation::Keep,
                    reference: 0,
                }),
            }),
            cull_mode: Some(Face::Back),
            front_face: FrontFace::Ccw,
            blend: Blend::Replace,
            color_writes: ColorWrites::empty(),
        }
    }

    /// Point light accumulation: back faces of the proxy behind geometry,
    /// where the stencil mark left 0.
    pub const fn point_light_proxy() -> Self {
        Self {
            depth_stencil: Some(DepthStencilTest {
                depth_compare: CompareFunction::GreaterEqual,
                depth_write: false,
                stencil: Some(StencilTest {
                    compare: CompareFunction::Equal,
                    fail_op: StencilOperation::Keep,
                    depth_fail_op: StencilOperation::Keep,
                    pass_op: StencilOperation::Keep,
                    reference: 0,
                }),
            }),
            cull_mode: Some(Face::Front),
            front_face: FrontFace::Ccw,
            blend: Blend::Additive,
            color_writes: ColorWrites::ALL,
        }
    }

    /// Visible light source markers.
    pub const fn point_light_source() -> Self {
        Self {
            depth_stencil: Some(DepthStencilTest {
                depth_compare: CompareFunction::LessEqual,
                depth_write: false,
                stencil: None,
            }),
            cull_mode: Some(Face::Back),
            front_face: FrontFace::Ccw,
            blend: Blend::Alpha,
            color_writes: ColorWrites::ALL,
        }
    }

    /// Opaque scene geometry of the bloom demo.
    pub const fn scene() -> Self {
        Self {
            depth_stencil: Some(DepthStencilTest {
                depth_compare: CompareFunction::Less,
                depth_write: true,
                stencil: None,
            }),
            cull_mode: Some(Face::Back),
            front_face: FrontFace::Ccw,
            blend: Blend::Replace,
            color_writes: ColorWrites::ALL,
        }
    }

    /// Skybox drawn at the far plane behind the scene.
    pub const fn skybox() -> Self {
        Self {
            depth_stencil: Some(DepthStencilTest {
                depth_compare: CompareFunction::LessEqual,
                depth_write: false,
                stencil: None,
            }),
            cull_mode: None,
            front_face: FrontFace::Ccw,
            blend: Blend::Replace,
            color_writes: ColorWrites::ALL,
        }
    }

    pub fn uses_stencil(&self) -> bool {
        self.depth_stencil.map(|d| d.stencil.is_some()).unwrap_or(false)
    }

    /// Stencil reference to set before drawing.
    pub fn stencil_reference(&self) -> u32 {
        self.depth_stencil
            .and_then(|d| d.stencil)
            .map(|s| s.reference)
            .unwrap_or(0)
    }

    pub fn primitive_state(&self) -> PrimitiveState {
        PrimitiveState {
            topology: PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: self.front_face,
            cull_mode: self.cull_mode,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        }
    }

    /// Depth/stencil state against [`DEPTH_STENCIL_FORMAT`].
    pub fn depth_stencil_state(&self) -> Option<DepthStencilState> {
        self.depth_stencil.map(|test| {
            let stencil = match test.stencil {
                Some(s) => {
                    let face = StencilFaceState {
                        compare: s.compare,
                        fail_op: s.fail_op,
                        depth_fail_op: s.depth_fail_op,
                        pass_op: s.pass_op,
                    };
                    StencilState {
                        front: face,
                        back: face,
                        read_mask: 0xff,
                        write_mask: 0xff,
                    }
                }
                None => StencilState::default(),
            };
            DepthStencilState {
                format: DEPTH_STENCIL_FORMAT,
                depth_write_enabled: test.depth_write,
                depth_compare: test.depth_compare,
                stencil,
                bias: DepthBiasState::default(),
            }
        })
    }

    pub fn blend_state(&self) -> Option<BlendState> {
        match self.blend {
            Blend::Replace => Some(BlendState::REPLACE),
            Blend::Additive => {
                let add = BlendComponent {
                    src_factor: BlendFactor::One,
                    dst_factor: BlendFactor::One,
                    operation: BlendOperation::Add,
                };
                Some(BlendState {
                    color: add,
                    alpha: add,
                })
            }
            Blend::Alpha => Some(BlendState::ALPHA_BLENDING),
        }
    }

    /// Colour target for `format`; blending is dropped for formats that cannot blend.
    pub fn color_target(&self, format: TextureFormat) -> ColorTargetState {
        let blendable = !matches!(
            format,
            TextureFormat::R32Float | TextureFormat::Rg32Float | TextureFormat::Rgba32Float
        );
        ColorTargetState {
            format,
            blend: if blendable { self.blend_state() } else { None },
            write_mask: self.color_writes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gbuffer_marks_geometry() {
        let state = PassState::gbuffer();
        let ds = state.depth_stencil_state().unwrap();
        assert!(ds.depth_write_enabled);
        assert_eq!(ds.stencil.front.compare, CompareFunction::Always);
        assert_eq!(ds.stencil.front.pass_op, StencilOperation::Replace);
        assert_eq!(state.stencil_reference(), 1);
    }

    #[test]
    fn test_directional_light_skips_background() {
        let state = PassState::directional_light();
        let ds = state.depth_stencil_state().unwrap();
        assert!(!ds.depth_write_enabled);
        assert_eq!(ds.depth_compare, CompareFunction::Always);
        assert_eq!(ds.stencil.front.compare, CompareFunction::Equal);
        assert_eq!(state.stencil_reference(), GEOMETRY_STENCIL_REFERENCE);
        // Counter-clockwise triangle, clockwise front, front culled: the triangle survives.
        assert_eq!(state.front_face, FrontFace::Cw);
        assert_eq!(state.cull_mode, Some(Face::Front));
        assert_eq!(state.blend, Blend::Additive);
    }

    #[test]
    fn test_point_light_stencil_pair() {
        let mark = PassState::point_light_stencil();
        let light = PassState::point_light_proxy();

        let mark_ds = mark.depth_stencil.unwrap();
        assert_eq!(mark_ds.depth_compare, CompareFunction::LessEqual);
        assert_eq!(
            mark_ds.stencil.unwrap().depth_fail_op,
            StencilOperation::IncrementClamp
        );
        assert_eq!(mark.cull_mode, Some(Face::Back));
        assert!(mark.color_writes.is_empty());

        let light_ds = light.depth_stencil.unwrap();
        assert_eq!(light_ds.depth_compare, CompareFunction::GreaterEqual);
        assert_eq!(light_ds.stencil.unwrap().compare, CompareFunction::Equal);
        assert_eq!(light.stencil_reference(), 0);
        assert_eq!(light.cull_mode, Some(Face::Front));
        assert!(!mark_ds.depth_write && !light_ds.depth_write);
    }

    #[test]
    fn test_additive_blend() {
        let blend = PassState::point_light_proxy().blend_state().unwrap();
        assert_eq!(blend.color.src_factor, BlendFactor::One);
        assert_eq!(blend.color.dst_factor, BlendFactor::One);
        assert_eq!(blend.color.operation, BlendOperation::Add);
    }

    #[test]
    fn test_float32_targets_never_blend() {
        let target = PassState::gbuffer().color_target(TextureFormat::R32Float);
        assert!(target.blend.is_none());
        let target = PassState::gbuffer().color_target(TextureFormat::Rgba8Unorm);
        assert!(target.blend.is_some());
    }

    #[test]
    fn test_fullscreen_has_no_depth() {
        let state = PassState::fullscreen();
        assert!(state.depth_stencil_state().is_none());
        assert!(!state.uses_stencil());
        assert_eq!(state.primitive_state().cull_mode, None);
    }
}
