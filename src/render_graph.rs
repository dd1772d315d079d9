//! Explicit per-frame pass lists.
//!
//! A frame is an ordered list of [`PassDescriptor`]s with declared input and
//! output resource names. [`RenderGraph::validate`] runs once at setup and
//! rejects any pass that reads a resource no earlier pass produced, or that
//! samples the resource it renders to. The orchestrators then record the
//! passes in exactly this order.
//!
//! `reads` lists sampled inputs only. Depth/stencil and blend targets are
//! attachments and appear in `writes`.

use std::collections::HashSet;

use glam::UVec2;

use crate::bloom::{
    dual_filter_schedule, tent_filter_schedule, BloomMode, DemoConfiguration, FilterSchedule,
    FilterStepKind, FilterTexture,
};
use crate::error::{RenderError, RenderResult};
use crate::pass_state::PassState;

pub mod resources {
    pub const GBUFFER_ALBEDO: &str = "gbuffer.albedo";
    pub const GBUFFER_NORMAL: &str = "gbuffer.normal";
    pub const GBUFFER_DEPTH: &str = "gbuffer.depth";
    pub const LIGHT_ACCUMULATION: &str = "light_accumulation";
    pub const DEPTH_STENCIL: &str = "depth_stencil";
    pub const OUTPUT: &str = "output";

    pub const OFFSCREEN_COLOR: &str = "offscreen_color";
    pub const LUMINANCE: &str = "luminance";
    pub const BLUR: [&str; 2] = ["blur.0", "blur.1"];
    pub const COMPUTE_BLUR: [&str; 2] = ["compute_blur.0", "compute_blur.1"];

    pub fn filter_level(level: usize) -> String {
        format!("filter.level{}", level)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassKind {
    GBuffer,
    DirectionalLight,
    PointLightStencil,
    PointLightProxy,
    PointLightSource,
    Blit,
    Scene,
    Downsample,
    GaussianHorizontal,
    GaussianVertical,
    ComputeHorizontal,
    ComputeVertical,
    Kawase,
    DualFilter,
    TentFilter,
    Composite,
}

#[derive(Clone, Debug)]
pub struct PassDescriptor {
    pub name: String,
    pub kind: PassKind,
    /// Light, iteration or step index for repeated pass kinds.
    pub index: usize,
    pub reads: Vec<String>,
    pub writes: Vec<String>,
    pub state: PassState,
}

impl PassDescriptor {
    pub fn new(kind: PassKind, name: impl Into<String>, state: PassState) -> Self {
        Self {
            name: name.into(),
            kind,
            index: 0,
            reads: Vec::new(),
            writes: Vec::new(),
            state,
        }
    }

    pub fn index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn read(mut self, resource: impl Into<String>) -> Self {
        self.reads.push(resource.into());
        self
    }

    pub fn write(mut self, resource: impl Into<String>) -> Self {
        self.writes.push(resource.into());
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct RenderGraph {
    imports: Vec<String>,
    outputs: Vec<String>,
    passes: Vec<PassDescriptor>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource produced outside the graph.
    pub fn import(&mut self, resource: impl Into<String>) -> &mut Self {
        self.imports.push(resource.into());
        self
    }

    /// Resource the frame must produce.
    pub fn output(&mut self, resource: impl Into<String>) -> &mut Self {
        self.outputs.push(resource.into());
        self
    }

    pub fn add(&mut self, pass: PassDescriptor) -> &mut Self {
        self.passes.push(pass);
        self
    }

    pub fn passes(&self) -> &[PassDescriptor] {
        &self.passes
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn count(&self, kind: PassKind) -> usize {
        self.passes.iter().filter(|p| p.kind == kind).count()
    }

    pub fn validate(&self) -> RenderResult<()> {
        let mut available: HashSet<&str> = self.imports.iter().map(String::as_str).collect();

        for (position, pass) in self.passes.iter().enumerate() {
            for read in &pass.reads {
                if pass.writes.contains(read) {
                    return Err(RenderError::InvalidRenderGraph(format!(
                        "pass {} '{}' samples '{}' while rendering to it",
                        position, pass.name, read
                    )));
                }
                if !available.contains(read.as_str()) {
                    return Err(RenderError::InvalidRenderGraph(format!(
                        "pass {} '{}' reads '{}' before any pass writes it",
                        position, pass.name, read
                    )));
                }
            }
            if pass.writes.is_empty() {
                return Err(RenderError::InvalidRenderGraph(format!(
                    "pass {} '{}' writes nothing",
                    position, pass.name
                )));
            }
            available.extend(pass.writes.iter().map(String::as_str));
        }

        for output in &self.outputs {
            if !available.contains(output.as_str()) {
                return Err(RenderError::InvalidRenderGraph(format!(
                    "no pass produces '{}'",
                    output
                )));
            }
        }
        Ok(())
    }

    /// Pass names in recording order.
    pub fn describe(&self) -> Vec<String> {
        self.passes.iter().map(|p| p.name.clone()).collect()
    }

    /// Position of the last pass with a depth/stencil attachment; that pass
    /// discards depth and stencil instead of storing them.
    pub fn last_depth_stencil_use(&self) -> Option<usize> {
        self.passes.iter().rposition(|p| p.state.depth_stencil.is_some())
    }
}

// ============================================================================
// Deferred shading
// ============================================================================

/// G-buffer fill, one pass per directional light, a stencil/lighting pair
/// per point light, the light source markers and the final blit.
pub fn deferred_graph(num_directional: usize, num_point: usize) -> RenderGraph {
    use resources::*;

    let mut graph = RenderGraph::new();
    graph.output(OUTPUT);
    graph.add(
        PassDescriptor::new(PassKind::GBuffer, "gbuffer", PassState::gbuffer())
            .write(GBUFFER_ALBEDO)
            .write(GBUFFER_NORMAL)
            .write(GBUFFER_DEPTH)
            .write(LIGHT_ACCUMULATION)
            .write(DEPTH_STENCIL),
    );

    for i in 0..num_directional {
        graph.add(
            PassDescriptor::new(
                PassKind::DirectionalLight,
                format!("directional_light[{}]", i),
                PassState::directional_light(),
            )
            .index(i)
            .read(GBUFFER_ALBEDO)
            .read(GBUFFER_NORMAL)
            .read(GBUFFER_DEPTH)
            .write(LIGHT_ACCUMULATION),
        );
    }

    for i in 0..num_point {
        graph.add(
            PassDescriptor::new(
                PassKind::PointLightStencil,
                format!("point_light_stencil[{}]", i),
                PassState::point_light_stencil(),
            )
            .index(i)
            .write(DEPTH_STENCIL),
        );
        graph.add(
            PassDescriptor::new(
                PassKind::PointLightProxy,
                format!("point_light_proxy[{}]", i),
                PassState::point_light_proxy(),
            )
            .index(i)
            .read(GBUFFER_ALBEDO)
            .read(GBUFFER_NORMAL)
            .read(GBUFFER_DEPTH)
            .write(LIGHT_ACCUMULATION),
        );
    }

    if num_point > 0 {
        graph.add(
            PassDescriptor::new(
                PassKind::PointLightSource,
                "point_light_sources",
                PassState::point_light_source(),
            )
            .write(LIGHT_ACCUMULATION),
        );
    }

    graph.add(
        PassDescriptor::new(PassKind::Blit, "blit", PassState::fullscreen())
            .read(LIGHT_ACCUMULATION)
            .write(OUTPUT),
    );
    graph
}

// ============================================================================
// Bloom
// ============================================================================

fn filter_resource(texture: FilterTexture) -> String {
    match texture {
        FilterTexture::Luminance => resources::LUMINANCE.to_string(),
        FilterTexture::Level(level) => resources::filter_level(level),
        FilterTexture::Output => resources::OUTPUT.to_string(),
    }
}

fn add_filter_steps(graph: &mut RenderGraph, kind: PassKind, label: &str, schedule: &FilterSchedule) {
    for (i, step) in schedule.steps.iter().enumerate() {
        let direction = match step.kind {
            FilterStepKind::Down => "down",
            FilterStepKind::FirstUp | FilterStepKind::Up => "up",
            FilterStepKind::Final => "final",
        };
        let mut pass = PassDescriptor::new(kind, format!("{}_{}[{}]", label, direction, i), PassState::fullscreen())
            .index(i)
            .read(filter_resource(step.source));
        if let Some(add) = step.add {
            pass = pass.read(filter_resource(add));
        }
        if step.kind == FilterStepKind::Final {
            pass = pass.read(resources::OFFSCREEN_COLOR);
        }
        graph.add(pass.write(filter_resource(step.target)));
    }
}

/// Resource holding the blurred luminance the composite samples.
pub fn blur_result(mode: BloomMode, config: &DemoConfiguration) -> Option<&'static str> {
    use resources::*;
    match mode {
        BloomMode::NoBloom | BloomMode::DualFilter | BloomMode::TentFilter => None,
        BloomMode::Compute | BloomMode::HybridGaussian => Some(COMPUTE_BLUR[0]),
        BloomMode::Kawase => Some(BLUR[crate::ping_pong::result_slot(config.kawase_kernels.len())]),
        _ => Some(BLUR[0]),
    }
}

/// Scene pass, the mode's blur passes and the composite.
pub fn bloom_graph(mode: BloomMode, config: &DemoConfiguration, framebuffer: UVec2) -> RenderGraph {
    use resources::*;

    let mut graph = RenderGraph::new();
    graph.output(OUTPUT);
    graph.add(
        PassDescriptor::new(PassKind::Scene, "scene", PassState::scene())
            .write(OFFSCREEN_COLOR)
            .write(LUMINANCE),
    );

    let pair = if mode.uses_compute() { COMPUTE_BLUR } else { BLUR };
    if mode != BloomMode::NoBloom && mode.needs_downsample() {
        graph.add(
            PassDescriptor::new(PassKind::Downsample, "downsample", PassState::fullscreen())
                .read(LUMINANCE)
                .write(pair[0]),
        );
    }

    let separable = |graph: &mut RenderGraph, horizontal: PassKind, vertical: PassKind| {
        graph.add(
            PassDescriptor::new(horizontal, "blur_horizontal", PassState::fullscreen())
                .read(pair[0])
                .write(pair[1]),
        );
        graph.add(
            PassDescriptor::new(vertical, "blur_vertical", PassState::fullscreen())
                .index(1)
                .read(pair[1])
                .write(pair[0]),
        );
    };

    match mode {
        BloomMode::NoBloom => {}
        BloomMode::GaussianOriginal | BloomMode::GaussianLinear | BloomMode::GaussianLinearTruncated => {
            separable(&mut graph, PassKind::GaussianHorizontal, PassKind::GaussianVertical)
        }
        BloomMode::Compute => separable(&mut graph, PassKind::ComputeHorizontal, PassKind::ComputeVertical),
        BloomMode::HybridGaussian => {
            separable(&mut graph, PassKind::ComputeHorizontal, PassKind::GaussianVertical)
        }
        BloomMode::Kawase => {
            for i in 0..config.kawase_kernels.len() {
                graph.add(
                    PassDescriptor::new(PassKind::Kawase, format!("kawase[{}]", i), PassState::fullscreen())
                        .index(i)
                        .read(BLUR[crate::ping_pong::source_slot(i)])
                        .write(BLUR[crate::ping_pong::destination_slot(i)]),
                );
            }
        }
        BloomMode::DualFilter => add_filter_steps(
            &mut graph,
            PassKind::DualFilter,
            "dual_filter",
            &dual_filter_schedule(framebuffer, config.dual_filter_iterations),
        ),
        BloomMode::TentFilter => add_filter_steps(
            &mut graph,
            PassKind::TentFilter,
            "tent_filter",
            &tent_filter_schedule(framebuffer, config.tent_filter_iterations),
        ),
    }

    if mode.needs_separate_composite() {
        let mut composite = PassDescriptor::new(PassKind::Composite, "composite", PassState::fullscreen())
            .read(OFFSCREEN_COLOR);
        if let Some(blurred) = blur_result(mode, config) {
            composite = composite.read(blurred);
        }
        graph.add(composite.write(OUTPUT));
    }
    graph
}
