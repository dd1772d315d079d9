//! Multi-mode bloom processor.
//!
//! Renders the scene into an HDR target plus a thresholded luminance
//! target, blurs the luminance with the selected [`BloomMode`] and
//! composites the result. Dual and tent filters fold the composite into
//! their last upsample.
//!
//! The pass order comes from [`bloom_graph`]; this module only knows how to
//! record each pass kind against the targets the graph names.

use glam::{Mat4, UVec2, Vec2, Vec3};

use crate::bloom::{
    demo_configuration, dual_filter_schedule, kernels_for, tent_filter_schedule, BloomMode, DownsampleFilter,
    Environment, FilterSchedule, FilterStepKind, KawaseSchedule, ModeKernels,
};
use crate::error::{RenderError, RenderResult};
use crate::gaussian::{GaussianKernel, MAX_GAUSSIAN_HALF_KERNEL};
use crate::gpu::compute_blur::{BlurDirection, ComputeBlur, STORAGE_FORMAT};
use crate::gpu::context::GpuContext;
use crate::gpu::mesh::{create_fullscreen_buffer, create_statue_geometry, GpuMesh, QuadVertex, Vertex};
use crate::gpu::pipeline::{
    begin_fullscreen_pass, create_linear_sampler, create_pass_pipeline, sampler_entry, texture_entry, uniform_entry,
    PipelineDesc,
};
use crate::gpu::targets::RenderTarget;
use crate::gpu::uniform_buffer::StructuredBuffer;
use crate::pass_state::PassState;
use crate::ping_pong::PingPong;
use crate::render_graph::{bloom_graph, resources, PassDescriptor, PassKind, RenderGraph};
use crate::structured_buffer::{FieldDesc, GpuDataType, StructLayout};

const SCENE_SHADER: &str = include_str!("shader_scene.wgsl");
const FILTER_SHADER: &str = include_str!("shader_filter.wgsl");
const GAUSSIAN_SHADER: &str = include_str!("shader_gaussian.wgsl");
const COMPOSITE_SHADER: &str = include_str!("shader_composite.wgsl");

/// Format of the offscreen colour, luminance and blur targets.
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Output image format; sRGB encoding happens on store.
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// Tap data slices, one per pass of the longest bloom graph.
pub const MAX_BLOOM_PASSES: usize = 16;

const TAP_COUNT: usize = 8;

// ============================================================================
// Uniform layouts
// ============================================================================

pub fn scene_layout(alignment: usize) -> StructLayout {
    StructLayout::new(
        vec![
            FieldDesc::new("mModelViewProjection", GpuDataType::Mat4),
            FieldDesc::new("mModel", GpuDataType::Mat4),
            FieldDesc::new("mSkyInverseViewProjection", GpuDataType::Mat4),
            FieldDesc::new("fExposure", GpuDataType::Float),
            FieldDesc::new("fThreshold", GpuDataType::Float),
            FieldDesc::new("vZenith", GpuDataType::Vec4),
            FieldDesc::new("vHorizon", GpuDataType::Vec4),
            FieldDesc::new("vGround", GpuDataType::Vec4),
        ],
        1,
        alignment,
    )
}

/// Per-pass sample offsets for the multi-tap filters.
pub fn tap_layout(count: usize, alignment: usize) -> StructLayout {
    StructLayout::new(
        vec![
            FieldDesc::array("aOffsets", GpuDataType::Vec2, TAP_COUNT),
            FieldDesc::new("fAddWeight", GpuDataType::Float),
        ],
        count,
        alignment,
    )
}

/// Separable Gaussian kernel; slice 0 is horizontal, slice 1 vertical.
pub fn blur_layout(alignment: usize) -> StructLayout {
    StructLayout::new(
        vec![
            FieldDesc::new("vTexelStep", GpuDataType::Vec2),
            FieldDesc::new("uTapCount", GpuDataType::UInt),
            FieldDesc::new("uCentreTap", GpuDataType::UInt),
            FieldDesc::array("aWeights", GpuDataType::Float, MAX_GAUSSIAN_HALF_KERNEL),
            FieldDesc::array("aOffsets", GpuDataType::Float, MAX_GAUSSIAN_HALF_KERNEL),
        ],
        2,
        alignment,
    )
}

pub fn composite_layout(alignment: usize) -> StructLayout {
    StructLayout::new(vec![FieldDesc::new("fExposure", GpuDataType::Float)], 1, alignment)
}

// ============================================================================
// Plan
// ============================================================================

/// Everything one mode/configuration pair needs, computed once when the
/// selection changes.
#[derive(Clone, Debug)]
pub struct BloomPlan {
    pub mode: BloomMode,
    pub configuration: usize,
    pub graph: RenderGraph,
    pub kernels: Option<ModeKernels>,
    pub kawase: Option<KawaseSchedule>,
    pub schedule: Option<FilterSchedule>,
}

impl BloomPlan {
    pub fn new(mode: BloomMode, configuration: usize, framebuffer: UVec2, blur_size: UVec2) -> RenderResult<Self> {
        let config = demo_configuration(configuration);
        let graph = bloom_graph(mode, config, framebuffer);
        graph.validate()?;
        if graph.len() > MAX_BLOOM_PASSES {
            return Err(RenderError::InvalidRenderGraph(format!(
                "{} passes exceed the {} tap slices",
                graph.len(),
                MAX_BLOOM_PASSES
            )));
        }

        let schedule = match mode {
            BloomMode::DualFilter => Some(dual_filter_schedule(framebuffer, config.dual_filter_iterations)),
            BloomMode::TentFilter => Some(tent_filter_schedule(framebuffer, config.tent_filter_iterations)),
            _ => None,
        };
        let kawase = (mode == BloomMode::Kawase).then(|| KawaseSchedule::new(config.kawase_kernels, blur_size));

        Ok(Self {
            mode,
            configuration,
            graph,
            kernels: kernels_for(mode, config),
            kawase,
            schedule,
        })
    }
}

/// Per-frame scene parameters.
#[derive(Clone, Copy, Debug)]
pub struct SceneFrame<'a> {
    pub model: Mat4,
    pub view_projection: Mat4,
    /// Inverse view-projection without the camera translation.
    pub sky_inverse_view_projection: Mat4,
    pub exposure: f32,
    pub environment: &'a Environment,
}

// ============================================================================
// Targets
// ============================================================================

/// Every texture a bloom graph can name, sized once for the framebuffer.
pub struct BloomTargets {
    pub offscreen: RenderTarget,
    pub luminance: RenderTarget,
    pub depth: RenderTarget,
    pub blur: PingPong<RenderTarget>,
    /// Only allocated when the device runs compute shaders.
    pub compute_blur: Option<PingPong<RenderTarget>>,
    pub levels: Vec<RenderTarget>,
    pub output: RenderTarget,
}

impl BloomTargets {
    pub fn new(device: &wgpu::Device, framebuffer: UVec2, blur_size: UVec2, compute: bool) -> Self {
        let levels = crate::bloom::filter_level_dimensions(framebuffer)
            .into_iter()
            .take(crate::bloom::MAX_FILTER_ITERATIONS as usize - 1)
            .enumerate()
            .map(|(i, size)| RenderTarget::color(device, &format!("Filter Level {}", i), size, HDR_FORMAT))
            .collect();
        let compute_blur = compute.then(|| {
            PingPong::new(
                RenderTarget::storage(device, "Compute Blur 0", blur_size, STORAGE_FORMAT),
                RenderTarget::storage(device, "Compute Blur 1", blur_size, STORAGE_FORMAT),
            )
        });

        log::info!(
            "Bloom targets: framebuffer {}x{}, blur {}x{}",
            framebuffer.x,
            framebuffer.y,
            blur_size.x,
            blur_size.y
        );

        Self {
            offscreen: RenderTarget::color(device, "Offscreen Color", framebuffer, HDR_FORMAT),
            luminance: RenderTarget::color(device, "Luminance", framebuffer, HDR_FORMAT),
            depth: RenderTarget::depth_stencil(device, "Bloom Depth", framebuffer),
            blur: PingPong::new(
                RenderTarget::color(device, "Blur 0", blur_size, HDR_FORMAT),
                RenderTarget::color(device, "Blur 1", blur_size, HDR_FORMAT),
            ),
            compute_blur,
            levels,
            output: RenderTarget::output(device, framebuffer, OUTPUT_FORMAT),
        }
    }

    /// Target behind a render graph resource name.
    pub fn resolve(&self, resource: &str) -> RenderResult<&RenderTarget> {
        let target = match resource {
            resources::OFFSCREEN_COLOR => Some(&self.offscreen),
            resources::LUMINANCE => Some(&self.luminance),
            resources::OUTPUT => Some(&self.output),
            _ => {
                if let Some(i) = resources::BLUR.iter().position(|r| *r == resource) {
                    Some(self.blur.slot(i))
                } else if let Some(i) = resources::COMPUTE_BLUR.iter().position(|r| *r == resource) {
                    self.compute_blur.as_ref().map(|pair| pair.slot(i))
                } else {
                    filter_level_index(resource).and_then(|level| self.levels.get(level))
                }
            }
        };
        target.ok_or_else(|| RenderError::InvalidRenderGraph(format!("no target for '{}'", resource)))
    }
}

fn filter_level_index(resource: &str) -> Option<usize> {
    resource.strip_prefix("filter.level")?.parse().ok()
}

fn first<'a>(list: &'a [String], pass: &PassDescriptor) -> RenderResult<&'a str> {
    list.first()
        .map(String::as_str)
        .ok_or_else(|| RenderError::InvalidRenderGraph(format!("pass '{}' is missing a resource", pass.name)))
}

// ============================================================================
// Processor
// ============================================================================

struct FilterPipelines {
    downsample_2x2: wgpu::RenderPipeline,
    downsample_4x4: wgpu::RenderPipeline,
    kawase: wgpu::RenderPipeline,
    dual_down: wgpu::RenderPipeline,
    dual_up: wgpu::RenderPipeline,
    dual_final: wgpu::RenderPipeline,
    tent_first_up: wgpu::RenderPipeline,
    tent_up: wgpu::RenderPipeline,
    tent_final: wgpu::RenderPipeline,
}

pub struct BloomProcessor {
    statue_pipeline: wgpu::RenderPipeline,
    sky_pipeline: wgpu::RenderPipeline,
    filters: FilterPipelines,
    gaussian_pipeline: wgpu::RenderPipeline,
    composite_pipeline: wgpu::RenderPipeline,
    scene_only_pipeline: wgpu::RenderPipeline,
    compute: Option<ComputeBlur>,

    scene_layout: wgpu::BindGroupLayout,
    filter_layout: wgpu::BindGroupLayout,
    final_layout: wgpu::BindGroupLayout,
    gaussian_layout: wgpu::BindGroupLayout,
    composite_layout: wgpu::BindGroupLayout,
    bloom_input_layout: wgpu::BindGroupLayout,

    scene_uniforms: StructuredBuffer,
    tap_uniforms: StructuredBuffer,
    blur_uniforms: StructuredBuffer,
    composite_uniforms: StructuredBuffer,

    statue: GpuMesh,
    fullscreen: wgpu::Buffer,
    sampler: wgpu::Sampler,
}

impl BloomProcessor {
    pub fn new(ctx: &GpuContext, bloom_only: bool) -> RenderResult<Self> {
        let device = &ctx.device;
        let align = ctx.capabilities.uniform_offset_alignment as usize;
        let strategy = ctx.capabilities.buffer_update;
        let fragment = wgpu::ShaderStages::FRAGMENT;

        let scene_uniforms = StructuredBuffer::new(device, "Bloom Scene Data", scene_layout(align), strategy);
        let tap_uniforms = StructuredBuffer::new(device, "Bloom Tap Data", tap_layout(MAX_BLOOM_PASSES, align), strategy);
        let blur_uniforms = StructuredBuffer::new(device, "Bloom Blur Data", blur_layout(align), strategy);
        let composite_uniforms = StructuredBuffer::new(device, "Bloom Composite Data", composite_layout(align), strategy);

        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Scene Layout"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX_FRAGMENT, false, scene_uniforms.slice_size())],
        });
        let filter_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Filter Layout"),
            entries: &[
                texture_entry(0, fragment, true),
                sampler_entry(1, fragment),
                uniform_entry(2, fragment, true, tap_uniforms.slice_size()),
            ],
        });
        let final_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Final Step Layout"),
            entries: &[
                texture_entry(0, fragment, true),
                texture_entry(1, fragment, true),
                uniform_entry(2, fragment, false, composite_uniforms.slice_size()),
            ],
        });
        let gaussian_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Gaussian Layout"),
            entries: &[
                texture_entry(0, fragment, true),
                sampler_entry(1, fragment),
                uniform_entry(2, fragment, true, blur_uniforms.slice_size()),
            ],
        });
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Composite Layout"),
            entries: &[
                texture_entry(0, fragment, true),
                sampler_entry(1, fragment),
                uniform_entry(2, fragment, false, composite_uniforms.slice_size()),
            ],
        });
        let bloom_input_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Input Layout"),
            entries: &[texture_entry(0, fragment, true)],
        });

        let mut defines = Vec::new();
        if OUTPUT_FORMAT.is_srgb() {
            defines.push("FRAMEBUFFER_SRGB");
        }
        if bloom_only {
            defines.push("BLOOM_ONLY");
        }

        let scene_shader = ctx.create_shader("Bloom Scene Shader", SCENE_SHADER, &[])?;
        let filter_shader = ctx.create_shader("Bloom Filter Shader", FILTER_SHADER, &defines)?;
        let gaussian_shader = ctx.create_shader("Gaussian Blur Shader", GAUSSIAN_SHADER, &[])?;
        let composite_shader = ctx.create_shader("Bloom Composite Shader", COMPOSITE_SHADER, &defines)?;

        let scene_targets = [HDR_FORMAT, HDR_FORMAT];
        let statue_pipeline = create_pass_pipeline(
            device,
            &PipelineDesc {
                label: "Bloom Statue Pipeline",
                shader: &scene_shader,
                vertex_entry: "vs_statue",
                fragment_entry: "fs_statue",
                vertex_buffers: &[Vertex::desc()],
                bind_group_layouts: &[&scene_layout],
                targets: &scene_targets,
                state: &PassState::scene(),
            },
        );
        let sky_pipeline = create_pass_pipeline(
            device,
            &PipelineDesc {
                label: "Bloom Sky Pipeline",
                shader: &scene_shader,
                vertex_entry: "vs_sky",
                fragment_entry: "fs_sky",
                vertex_buffers: &[QuadVertex::desc()],
                bind_group_layouts: &[&scene_layout],
                targets: &scene_targets,
                state: &PassState::skybox(),
            },
        );

        let fullscreen_state = PassState::fullscreen();
        let fullscreen = |label: &str,
                          shader: &wgpu::ShaderModule,
                          entry: &str,
                          layouts: &[&wgpu::BindGroupLayout],
                          format: wgpu::TextureFormat| {
            create_pass_pipeline(
                device,
                &PipelineDesc {
                    label,
                    shader,
                    vertex_entry: "vs_main",
                    fragment_entry: entry,
                    vertex_buffers: &[QuadVertex::desc()],
                    bind_group_layouts: layouts,
                    targets: &[format],
                    state: &fullscreen_state,
                },
            )
        };

        let filter = [&filter_layout];
        let filter_final = [&filter_layout, &final_layout];
        let filters = FilterPipelines {
            downsample_2x2: fullscreen("Downsample 2x2", &filter_shader, "fs_downsample_2x2", &filter, HDR_FORMAT),
            downsample_4x4: fullscreen("Downsample 4x4", &filter_shader, "fs_downsample_4x4", &filter, HDR_FORMAT),
            kawase: fullscreen("Kawase Blur", &filter_shader, "fs_kawase", &filter, HDR_FORMAT),
            dual_down: fullscreen("Dual Filter Down", &filter_shader, "fs_dual_down", &filter, HDR_FORMAT),
            dual_up: fullscreen("Dual Filter Up", &filter_shader, "fs_dual_up", &filter, HDR_FORMAT),
            dual_final: fullscreen("Dual Filter Final", &filter_shader, "fs_dual_final", &filter_final, OUTPUT_FORMAT),
            tent_first_up: fullscreen("Tent Filter First Up", &filter_shader, "fs_tent_first_up", &filter, HDR_FORMAT),
            tent_up: fullscreen("Tent Filter Up", &filter_shader, "fs_tent_up", &filter_final, HDR_FORMAT),
            tent_final: fullscreen("Tent Filter Final", &filter_shader, "fs_tent_final", &filter_final, OUTPUT_FORMAT),
        };
        let gaussian_pipeline = fullscreen("Gaussian Blur", &gaussian_shader, "fs_main", &[&gaussian_layout], HDR_FORMAT);
        let composite_pipeline = fullscreen(
            "Bloom Composite",
            &composite_shader,
            "fs_main",
            &[&composite_layout, &bloom_input_layout],
            OUTPUT_FORMAT,
        );
        let scene_only_pipeline = fullscreen(
            "Scene Only Composite",
            &composite_shader,
            "fs_scene_only",
            &[&composite_layout],
            OUTPUT_FORMAT,
        );

        let compute = if ctx.capabilities.compute {
            Some(ComputeBlur::new(ctx)?)
        } else {
            log::warn!("Compute shaders unavailable; compute bloom modes are disabled");
            None
        };

        Ok(Self {
            statue_pipeline,
            sky_pipeline,
            filters,
            gaussian_pipeline,
            composite_pipeline,
            scene_only_pipeline,
            compute,
            scene_layout,
            filter_layout,
            final_layout,
            gaussian_layout,
            composite_layout,
            bloom_input_layout,
            scene_uniforms,
            tap_uniforms,
            blur_uniforms,
            composite_uniforms,
            statue: GpuMesh::upload(device, &create_statue_geometry(), "Statue"),
            fullscreen: create_fullscreen_buffer(device, "Bloom Fullscreen Triangle"),
            sampler: create_linear_sampler(device, "Bloom Sampler"),
        })
    }

    pub fn supports(&self, mode: BloomMode) -> bool {
        !mode.uses_compute() || self.compute.is_some()
    }

    pub fn write_scene(&mut self, queue: &wgpu::Queue, frame: &SceneFrame) -> RenderResult<()> {
        let environment = frame.environment;
        let color = |c: [f32; 3]| Vec3::from_array(c).extend(1.0);
        {
            let mut mapped = self.scene_uniforms.map(queue);
            mapped.set("mModelViewProjection", 0, frame.view_projection * frame.model)?;
            mapped.set("mModel", 0, frame.model)?;
            mapped.set("mSkyInverseViewProjection", 0, frame.sky_inverse_view_projection)?;
            mapped.set("fExposure", 0, frame.exposure)?;
            mapped.set("fThreshold", 0, environment.threshold)?;
            mapped.set("vZenith", 0, color(environment.zenith))?;
            mapped.set("vHorizon", 0, color(environment.horizon))?;
            mapped.set("vGround", 0, color(environment.ground))?;
        }
        let mut mapped = self.composite_uniforms.map(queue);
        mapped.set("fExposure", 0, frame.exposure)?;
        Ok(())
    }

    /// Upload the offsets and kernels `plan` needs. Call when the plan changes.
    pub fn prepare(&mut self, queue: &wgpu::Queue, plan: &BloomPlan, targets: &BloomTargets) -> RenderResult<()> {
        {
            let mut taps = self.tap_uniforms.map(queue);
            for (position, pass) in plan.graph.passes().iter().enumerate() {
                let (offsets, add_weight): (Vec<[f32; 2]>, f32) = match pass.kind {
                    PassKind::Downsample => {
                        let source = targets.resolve(first(&pass.reads, pass)?)?;
                        let destination = targets.resolve(first(&pass.writes, pass)?)?;
                        let offsets = crate::bloom::downsample_4x4_offsets(source.size, destination.size);
                        (offsets.to_vec(), 0.0)
                    }
                    PassKind::Kawase => match &plan.kawase {
                        Some(kawase) => (kawase.offsets[pass.index].to_vec(), 0.0),
                        None => continue,
                    },
                    PassKind::DualFilter | PassKind::TentFilter => match &plan.schedule {
                        Some(schedule) => {
                            let step = &schedule.steps[pass.index];
                            (step.offsets.clone(), if step.add.is_some() { 1.0 } else { 0.0 })
                        }
                        None => continue,
                    },
                    _ => continue,
                };
                for (i, offset) in offsets.iter().take(TAP_COUNT).enumerate() {
                    taps.set_array_element("aOffsets", position, i, Vec2::from_array(*offset))?;
                }
                taps.set("fAddWeight", position, add_weight)?;
            }
        }

        let Some(kernels) = &plan.kernels else {
            return Ok(());
        };
        for pass in plan.graph.passes() {
            match pass.kind {
                PassKind::GaussianHorizontal => {
                    let [x, _] = targets.resolve(first(&pass.writes, pass)?)?.texel_size();
                    self.write_blur_kernel(queue, 0, &kernels.horizontal, Vec2::new(x, 0.0))?;
                }
                PassKind::GaussianVertical => {
                    let [_, y] = targets.resolve(first(&pass.writes, pass)?)?.texel_size();
                    self.write_blur_kernel(queue, 1, &kernels.vertical, Vec2::new(0.0, y))?;
                }
                _ => {}
            }
        }
        if plan.mode.uses_compute() {
            let compute = self
                .compute
                .as_mut()
                .ok_or_else(|| RenderError::unsupported("Compute shaders are not supported"))?;
            compute.write_kernel(queue, &kernels.horizontal)?;
        }
        Ok(())
    }

    fn write_blur_kernel(
        &mut self,
        queue: &wgpu::Queue,
        slice: usize,
        kernel: &GaussianKernel,
        texel_step: Vec2,
    ) -> RenderResult<()> {
        let mut mapped = self.blur_uniforms.map(queue);
        mapped.set("vTexelStep", slice, texel_step)?;
        mapped.set("uTapCount", slice, kernel.tap_count() as u32)?;
        mapped.set("uCentreTap", slice, u32::from(kernel.centre_tap))?;
        for (i, (weight, offset)) in kernel.weights_f32().into_iter().zip(kernel.offsets_f32()).enumerate() {
            mapped.set_array_element("aWeights", slice, i, weight)?;
            mapped.set_array_element("aOffsets", slice, i, offset)?;
        }
        Ok(())
    }

    /// Record every pass of `plan` in graph order.
    pub fn record(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        plan: &BloomPlan,
        targets: &BloomTargets,
    ) -> RenderResult<()> {
        for (position, pass) in plan.graph.passes().iter().enumerate() {
            log::trace!("Recording bloom pass '{}'", pass.name);
            match pass.kind {
                PassKind::Scene => self.render_scene(device, encoder, targets),
                PassKind::Downsample => {
                    let source = targets.resolve(first(&pass.reads, pass)?)?;
                    let destination = targets.resolve(first(&pass.writes, pass)?)?;
                    let pipeline = match DownsampleFilter::select(source.size, destination.size) {
                        DownsampleFilter::Box2x2 => &self.filters.downsample_2x2,
                        DownsampleFilter::Box4x4 => &self.filters.downsample_4x4,
                    };
                    self.render_filter(device, encoder, &pass.name, pipeline, position, source, destination, None);
                }
                PassKind::Kawase => {
                    let source = targets.resolve(first(&pass.reads, pass)?)?;
                    let destination = targets.resolve(first(&pass.writes, pass)?)?;
                    self.render_filter(device, encoder, &pass.name, &self.filters.kawase, position, source, destination, None);
                }
                PassKind::DualFilter | PassKind::TentFilter => {
                    self.render_filter_step(device, encoder, plan, pass, position, targets)?;
                }
                PassKind::GaussianHorizontal | PassKind::GaussianVertical => {
                    let source = targets.resolve(first(&pass.reads, pass)?)?;
                    let destination = targets.resolve(first(&pass.writes, pass)?)?;
                    let slice = usize::from(pass.kind == PassKind::GaussianVertical);
                    self.render_gaussian(device, encoder, &pass.name, slice, source, destination);
                }
                PassKind::ComputeHorizontal | PassKind::ComputeVertical => {
                    let compute = self
                        .compute
                        .as_ref()
                        .ok_or_else(|| RenderError::unsupported("Compute shaders are not supported"))?;
                    let source = targets.resolve(first(&pass.reads, pass)?)?;
                    let destination = targets.resolve(first(&pass.writes, pass)?)?;
                    let direction = if pass.kind == PassKind::ComputeHorizontal {
                        BlurDirection::Horizontal
                    } else {
                        BlurDirection::Vertical
                    };
                    compute.record(device, encoder, direction, source, destination);
                }
                PassKind::Composite => {
                    let bloom = match pass.reads.get(1) {
                        Some(resource) => Some(targets.resolve(resource)?),
                        None => None,
                    };
                    self.render_composite(device, encoder, targets, bloom);
                }
                other => {
                    return Err(RenderError::InvalidRenderGraph(format!(
                        "{:?} pass '{}' in a bloom graph",
                        other, pass.name
                    )))
                }
            }
        }
        Ok(())
    }

    fn render_scene(&self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, targets: &BloomTargets) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Scene Bind Group"),
            layout: &self.scene_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.scene_uniforms.buffer().as_entire_binding(),
            }],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Bloom Scene Pass"),
            color_attachments: &[
                Some(targets.offscreen.clear_attachment(wgpu::Color::BLACK)),
                Some(targets.luminance.clear_attachment(wgpu::Color::BLACK)),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &targets.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Discard,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(0),
                    store: wgpu::StoreOp::Discard,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_bind_group(0, &bind_group, &[]);

        pass.set_pipeline(&self.statue_pipeline);
        self.statue.draw(&mut pass);

        // Sky last so depth testing rejects it behind the statue.
        pass.set_pipeline(&self.sky_pipeline);
        pass.set_vertex_buffer(0, self.fullscreen.slice(..));
        pass.draw(0..3, 0..1);
    }

    fn filter_bind_group(&self, device: &wgpu::Device, source: &RenderTarget) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Filter Bind Group"),
            layout: &self.filter_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.tap_uniforms.slice_binding(),
                },
            ],
        })
    }

    fn final_bind_group(&self, device: &wgpu::Device, add: &RenderTarget, offscreen: &RenderTarget) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Final Step Bind Group"),
            layout: &self.final_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&add.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&offscreen.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.composite_uniforms.buffer().as_entire_binding(),
                },
            ],
        })
    }

    /// Full-screen multi-tap filter using tap slice `slice`.
    /// `extra` is the (add, offscreen) pair for steps that bind group 1.
    #[allow(clippy::too_many_arguments)]
    fn render_filter(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pipeline: &wgpu::RenderPipeline,
        slice: usize,
        source: &RenderTarget,
        destination: &RenderTarget,
        extra: Option<(&RenderTarget, &RenderTarget)>,
    ) {
        let source_group = self.filter_bind_group(device, source);
        let extra_group = extra.map(|(add, offscreen)| self.final_bind_group(device, add, offscreen));

        let mut pass = begin_fullscreen_pass(encoder, label, &destination.view);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &source_group, &[self.tap_uniforms.dynamic_offset(slice)]);
        if let Some(group) = &extra_group {
            pass.set_bind_group(1, group, &[]);
        }
        pass.set_vertex_buffer(0, self.fullscreen.slice(..));
        pass.draw(0..3, 0..1);
    }

    fn render_filter_step(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        plan: &BloomPlan,
        pass: &PassDescriptor,
        position: usize,
        targets: &BloomTargets,
    ) -> RenderResult<()> {
        let step = plan
            .schedule
            .as_ref()
            .and_then(|schedule| schedule.steps.get(pass.index))
            .ok_or_else(|| RenderError::InvalidRenderGraph(format!("no filter step for '{}'", pass.name)))?;
        let source = targets.resolve(first(&pass.reads, pass)?)?;
        let destination = targets.resolve(first(&pass.writes, pass)?)?;
        // Steps without an add texture bind the source in its place with a zero weight.
        let add = match step.add {
            Some(_) => targets.resolve(first(pass.reads.get(1..).unwrap_or_default(), pass)?)?,
            None => source,
        };
        let dual = pass.kind == PassKind::DualFilter;
        let (pipeline, extra) = match (step.kind, dual) {
            (FilterStepKind::Down, true) => (&self.filters.dual_down, None),
            (FilterStepKind::Down, false) => (&self.filters.downsample_4x4, None),
            (FilterStepKind::FirstUp, _) => (&self.filters.tent_first_up, None),
            (FilterStepKind::Up, true) => (&self.filters.dual_up, None),
            (FilterStepKind::Up, false) => (&self.filters.tent_up, Some((add, &targets.offscreen))),
            (FilterStepKind::Final, true) => (&self.filters.dual_final, Some((add, &targets.offscreen))),
            (FilterStepKind::Final, false) => (&self.filters.tent_final, Some((add, &targets.offscreen))),
        };
        self.render_filter(device, encoder, &pass.name, pipeline, position, source, destination, extra);
        Ok(())
    }

    fn render_gaussian(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        slice: usize,
        source: &RenderTarget,
        destination: &RenderTarget,
    ) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Gaussian Blur Bind Group"),
            layout: &self.gaussian_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.blur_uniforms.slice_binding(),
                },
            ],
        });

        let mut pass = begin_fullscreen_pass(encoder, label, &destination.view);
        pass.set_pipeline(&self.gaussian_pipeline);
        pass.set_bind_group(0, &bind_group, &[self.blur_uniforms.dynamic_offset(slice)]);
        pass.set_vertex_buffer(0, self.fullscreen.slice(..));
        pass.draw(0..3, 0..1);
    }

    /// Exposed scene plus the blurred luminance, or the scene alone without bloom.
    fn render_composite(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        targets: &BloomTargets,
        bloom: Option<&RenderTarget>,
    ) {
        let scene_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Composite Bind Group"),
            layout: &self.composite_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&targets.offscreen.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.composite_uniforms.buffer().as_entire_binding(),
                },
            ],
        });
        let bloom_group = bloom.map(|bloom| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Bloom Input Bind Group"),
                layout: &self.bloom_input_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&bloom.view),
                }],
            })
        });

        let mut pass = begin_fullscreen_pass(encoder, "Bloom Composite Pass", &targets.output.view);
        match &bloom_group {
            Some(group) => {
                pass.set_pipeline(&self.composite_pipeline);
                pass.set_bind_group(0, &scene_group, &[]);
                pass.set_bind_group(1, group, &[]);
            }
            None => {
                pass.set_pipeline(&self.scene_only_pipeline);
                pass.set_bind_group(0, &scene_group, &[]);
            }
        }
        pass.set_vertex_buffer(0, self.fullscreen.slice(..));
        pass.draw(0..3, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::{blur_dimensions, DEFAULT_DEMO_CONFIGURATION};

    fn offset(layout: &StructLayout, name: &str) -> usize {
        layout.field(name).unwrap().offset
    }

    #[test]
    fn test_layouts_match_shaders() {
        let scene = scene_layout(256);
        assert_eq!(offset(&scene, "mSkyInverseViewProjection"), 128);
        assert_eq!(offset(&scene, "fExposure"), 192);
        assert_eq!(offset(&scene, "fThreshold"), 196);
        assert_eq!(offset(&scene, "vZenith"), 208);
        assert_eq!(offset(&scene, "vGround"), 240);
        assert_eq!(scene.struct_size(), 256);

        let taps = tap_layout(MAX_BLOOM_PASSES, 256);
        assert_eq!(offset(&taps, "fAddWeight"), 128);
        assert_eq!(taps.struct_size(), 144);

        let blur = blur_layout(256);
        assert_eq!(offset(&blur, "uTapCount"), 8);
        assert_eq!(offset(&blur, "uCentreTap"), 12);
        assert_eq!(offset(&blur, "aWeights"), 16);
        assert_eq!(offset(&blur, "aOffsets"), 16 + 26 * 16);
        assert_eq!(blur.struct_size(), 848);
        assert_eq!(blur.slice_count(), 2);

        assert_eq!(composite_layout(256).struct_size(), 16);
    }

    #[test]
    fn test_plan_for_every_mode() {
        let fb = UVec2::new(1280, 720);
        let blur = blur_dimensions(fb, 4);
        for mode in BloomMode::ALL {
            for configuration in 0..crate::bloom::NUM_DEMO_CONFIGURATIONS {
                let plan = BloomPlan::new(mode, configuration, fb, blur).unwrap();
                assert!(plan.graph.len() <= MAX_BLOOM_PASSES);
                assert_eq!(plan.kawase.is_some(), mode == BloomMode::Kawase);
                assert_eq!(plan.schedule.is_some(), mode.is_down_up_filter());
            }
        }
    }

    #[test]
    fn test_plan_steps_match_graph() {
        let fb = UVec2::new(640, 360);
        let plan = BloomPlan::new(BloomMode::TentFilter, 4, fb, blur_dimensions(fb, 4)).unwrap();
        let schedule = plan.schedule.as_ref().unwrap();
        let filter_passes = plan.graph.count(PassKind::TentFilter);
        assert_eq!(filter_passes, schedule.steps.len());
        for pass in plan.graph.passes().iter().filter(|p| p.kind == PassKind::TentFilter) {
            assert!(pass.index < schedule.steps.len());
        }
    }

    #[test]
    fn test_gaussian_plan_kernels() {
        let fb = UVec2::new(640, 360);
        let plan = BloomPlan::new(
            BloomMode::GaussianLinearTruncated,
            DEFAULT_DEMO_CONFIGURATION,
            fb,
            blur_dimensions(fb, 4),
        )
        .unwrap();
        let kernels = plan.kernels.unwrap();
        assert!(kernels.horizontal.tap_count() <= MAX_GAUSSIAN_HALF_KERNEL);
        assert_eq!(plan.graph.count(PassKind::GaussianHorizontal), 1);
        assert_eq!(plan.graph.count(PassKind::GaussianVertical), 1);
    }

    #[test]
    fn test_filter_level_names() {
        assert_eq!(filter_level_index(&resources::filter_level(7)), Some(7));
        assert_eq!(filter_level_index("luminance"), None);
    }
}
