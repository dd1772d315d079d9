//! Bloom modes, demo configurations and per-mode blur schedules.
//!
//! Everything here is pure data: which kernel each mode uses, the offsets
//! each Kawase/dual/tent step samples at, the resolutions those steps run
//! at and which texture each step reads and writes. The GPU executors in
//! [`crate::gpu`] consume these schedules verbatim.

use glam::{UVec2, Vec2, Vec3};
use serde::Serialize;

use crate::gaussian::{GaussianKernel, MINIMUM_ACCEPTABLE_COEFFICIENT};

/// Upper bound on dual/tent filter steps (down + up).
pub const MAX_FILTER_ITERATIONS: u32 = 10;

/// Upper bound on Kawase iterations.
pub const MAX_KAWASE_ITERATIONS: usize = 5;

pub const NUM_DEMO_CONFIGURATIONS: usize = 5;
pub const DEFAULT_DEMO_CONFIGURATION: usize = 2;

/// Seconds each mode/configuration is shown when cycling automatically.
pub const MODE_DURATION_SECS: f32 = 1.5;

// ============================================================================
// Modes
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum BloomMode {
    NoBloom,
    GaussianOriginal,
    GaussianLinear,
    Compute,
    HybridGaussian,
    #[default]
    GaussianLinearTruncated,
    Kawase,
    DualFilter,
    TentFilter,
}

impl BloomMode {
    pub const ALL: [BloomMode; 9] = [
        BloomMode::NoBloom,
        BloomMode::GaussianOriginal,
        BloomMode::GaussianLinear,
        BloomMode::Compute,
        BloomMode::HybridGaussian,
        BloomMode::GaussianLinearTruncated,
        BloomMode::Kawase,
        BloomMode::DualFilter,
        BloomMode::TentFilter,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn title(self) -> &'static str {
        match self {
            BloomMode::NoBloom => "Original Image (No Post Processing)",
            BloomMode::GaussianOriginal => "Gaussian (Reference Implementation)",
            BloomMode::GaussianLinear => "Gaussian (Linear Sampling)",
            BloomMode::Compute => "Gaussian (Compute Sliding Average)",
            BloomMode::HybridGaussian => "Hybrid Gaussian",
            BloomMode::GaussianLinearTruncated => "Truncated Gaussian (Linear Sampling)",
            BloomMode::Kawase => "Kawase",
            BloomMode::DualFilter => "Dual Filter",
            BloomMode::TentFilter => "Tent Filter",
        }
    }

    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::COUNT]
    }

    pub fn previous(self) -> Self {
        Self::ALL[(self.index() + Self::COUNT - 1) % Self::COUNT]
    }

    /// Dual and tent filters downsample themselves and fold in the composite.
    pub fn is_down_up_filter(self) -> bool {
        matches!(self, BloomMode::DualFilter | BloomMode::TentFilter)
    }

    /// Modes whose working textures are written by compute shaders.
    pub fn uses_compute(self) -> bool {
        matches!(self, BloomMode::Compute | BloomMode::HybridGaussian)
    }

    /// Modes that downsample luminance into the blur working resolution first.
    pub fn needs_downsample(self) -> bool {
        !self.is_down_up_filter()
    }

    pub fn needs_separate_composite(self) -> bool {
        !self.is_down_up_filter()
    }
}

// ============================================================================
// Demo configurations
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize)]
pub struct DemoConfiguration {
    pub gaussian_kernel: u32,
    pub linear_gaussian_kernel: u32,
    pub compute_gaussian_kernel: u32,
    pub truncated_linear_gaussian_kernel: u32,
    pub kawase_kernels: &'static [u32],
    pub dual_filter_iterations: u32,
    pub tent_filter_iterations: u32,
}

pub const DEMO_CONFIGURATIONS: [DemoConfiguration; NUM_DEMO_CONFIGURATIONS] = [
    DemoConfiguration {
        gaussian_kernel: 5,
        linear_gaussian_kernel: 5,
        compute_gaussian_kernel: 5,
        truncated_linear_gaussian_kernel: 5,
        kawase_kernels: &[0, 0],
        dual_filter_iterations: 2,
        tent_filter_iterations: 2,
    },
    DemoConfiguration {
        gaussian_kernel: 15,
        linear_gaussian_kernel: 15,
        compute_gaussian_kernel: 15,
        truncated_linear_gaussian_kernel: 11,
        kawase_kernels: &[0, 0, 1],
        dual_filter_iterations: 4,
        tent_filter_iterations: 4,
    },
    DemoConfiguration {
        gaussian_kernel: 25,
        linear_gaussian_kernel: 25,
        compute_gaussian_kernel: 25,
        truncated_linear_gaussian_kernel: 17,
        kawase_kernels: &[0, 0, 1, 1],
        dual_filter_iterations: 6,
        tent_filter_iterations: 6,
    },
    DemoConfiguration {
        gaussian_kernel: 35,
        linear_gaussian_kernel: 35,
        compute_gaussian_kernel: 35,
        truncated_linear_gaussian_kernel: 21,
        kawase_kernels: &[0, 1, 1, 1],
        dual_filter_iterations: 8,
        tent_filter_iterations: 8,
    },
    DemoConfiguration {
        gaussian_kernel: 51,
        linear_gaussian_kernel: 51,
        compute_gaussian_kernel: 51,
        truncated_linear_gaussian_kernel: 25,
        kawase_kernels: &[0, 0, 1, 1, 2],
        dual_filter_iterations: 10,
        tent_filter_iterations: 10,
    },
];

/// Demo configuration for `index`, falling back to the default when out of range.
pub fn demo_configuration(index: usize) -> &'static DemoConfiguration {
    DEMO_CONFIGURATIONS
        .get(index)
        .unwrap_or(&DEMO_CONFIGURATIONS[DEFAULT_DEMO_CONFIGURATION])
}

/// Separable kernels a mode blurs with.
#[derive(Clone, Debug)]
pub struct ModeKernels {
    pub horizontal: GaussianKernel,
    pub vertical: GaussianKernel,
}

/// Kernels for Gaussian-family modes; `None` for the others.
pub fn kernels_for(mode: BloomMode, config: &DemoConfiguration) -> Option<ModeKernels> {
    let min = MINIMUM_ACCEPTABLE_COEFFICIENT;
    let same = |kernel: GaussianKernel| ModeKernels {
        horizontal: kernel.clone(),
        vertical: kernel,
    };
    match mode {
        BloomMode::GaussianOriginal => Some(same(GaussianKernel::generate(
            config.gaussian_kernel,
            false,
            false,
            min,
        ))),
        BloomMode::GaussianLinear => Some(same(GaussianKernel::generate(
            config.linear_gaussian_kernel,
            false,
            true,
            min,
        ))),
        BloomMode::GaussianLinearTruncated => Some(same(GaussianKernel::generate(
            config.truncated_linear_gaussian_kernel,
            true,
            true,
            min,
        ))),
        BloomMode::Compute => Some(same(GaussianKernel::generate(
            config.compute_gaussian_kernel,
            false,
            false,
            min,
        ))),
        BloomMode::HybridGaussian => Some(ModeKernels {
            horizontal: GaussianKernel::generate(config.compute_gaussian_kernel, false, false, min),
            vertical: GaussianKernel::generate(config.truncated_linear_gaussian_kernel, true, true, min),
        }),
        _ => None,
    }
}

/// Human-readable summary of the active mode and configuration.
pub fn blur_description(mode: BloomMode, config_index: usize) -> String {
    let config = demo_configuration(config_index);
    let detail = match mode {
        BloomMode::NoBloom => return mode.title().to_string(),
        BloomMode::GaussianOriginal | BloomMode::GaussianLinear | BloomMode::GaussianLinearTruncated => {
            let kernel = match kernels_for(mode, config) {
                Some(kernels) => kernels.horizontal,
                None => return mode.title().to_string(),
            };
            format!(
                "Kernel Size = {} ({} + {} taps)",
                kernel.kernel_size,
                kernel.tap_count(),
                kernel.tap_count()
            )
        }
        BloomMode::Compute => format!("Kernel Size = {} (Sliding Average)", config.compute_gaussian_kernel),
        BloomMode::HybridGaussian => {
            let (compute, linear) = match kernels_for(mode, config) {
                Some(kernels) => (kernels.horizontal.tap_count(), kernels.vertical.tap_count()),
                None => return mode.title().to_string(),
            };
            format!(
                "Horizontal Compute {} taps, Vertical Linear Gaussian {} taps",
                compute, linear
            )
        }
        BloomMode::Kawase => {
            let kernels: Vec<String> = config.kawase_kernels.iter().map(|k| k.to_string()).collect();
            format!("{} Iterations: {}", config.kawase_kernels.len(), kernels.join(","))
        }
        BloomMode::DualFilter => iteration_description(config.dual_filter_iterations),
        BloomMode::TentFilter => iteration_description(config.tent_filter_iterations),
    };
    format!("{}\n{}", mode.title(), detail)
}

fn iteration_description(iterations: u32) -> String {
    format!(
        "Iterations = {} ({} Downsamples, {} Upsamples)",
        iterations,
        iterations / 2,
        iterations / 2
    )
}

// ============================================================================
// Automatic cycling
// ============================================================================

/// Steps through configurations and modes on a timer.
///
/// Every [`MODE_DURATION_SECS`] the configuration advances; after the last
/// configuration wraps the mode advances too. `NoBloom` has no
/// configurations and advances the environment instead.
#[derive(Clone, Debug)]
pub struct DemoCycler {
    pub mode: BloomMode,
    pub configuration: usize,
    pub environment: usize,
    logic_time: f32,
    switch_time: f32,
}

impl DemoCycler {
    pub fn new(mode: BloomMode, configuration: usize, environment: usize) -> Self {
        Self {
            mode,
            configuration,
            environment,
            logic_time: 0.0,
            switch_time: 0.0,
        }
    }

    /// Advance the clock. Returns true when the mode or configuration changed.
    pub fn advance(&mut self, frame_time_ms: f32) -> bool {
        self.logic_time += frame_time_ms * 0.001;
        if self.logic_time <= self.switch_time + MODE_DURATION_SECS {
            return false;
        }
        self.switch_time = self.logic_time;

        if self.mode != BloomMode::NoBloom {
            self.configuration = (self.configuration + 1) % NUM_DEMO_CONFIGURATIONS;
        }
        if self.configuration == 0 || self.mode == BloomMode::NoBloom {
            self.mode = self.mode.next();
        }
        if self.mode == BloomMode::NoBloom {
            self.environment = (self.environment + 1) % ENVIRONMENTS.len();
        }
        true
    }
}

// ============================================================================
// Downsampling
// ============================================================================

/// Box filter used to bring luminance down to the blur resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DownsampleFilter {
    /// One bilinear fetch, for at most a halving in each dimension.
    Box2x2,
    /// Four bilinear fetches.
    Box4x4,
}

impl DownsampleFilter {
    pub fn select(source: UVec2, destination: UVec2) -> Self {
        let destination = destination.max(UVec2::ONE);
        if source.x <= destination.x * 2 && source.y <= destination.y * 2 {
            DownsampleFilter::Box2x2
        } else {
            DownsampleFilter::Box4x4
        }
    }
}

/// Offsets for the 4x4 box downsample: four bilinear fetches at `(±1, ±1)` source texels.
pub fn downsample_4x4_offsets(source: UVec2, destination: UVec2) -> [[f32; 2]; 4] {
    let destination = destination.max(UVec2::ONE);
    let ratio = (source / destination).max(UVec2::ONE).as_vec2();
    let step = Vec2::ONE / (destination.as_vec2() * ratio);
    [
        (step * Vec2::new(-1.0, -1.0)).to_array(),
        (step * Vec2::new(1.0, -1.0)).to_array(),
        (step * Vec2::new(-1.0, 1.0)).to_array(),
        (step * Vec2::new(1.0, 1.0)).to_array(),
    ]
}

/// Blur working resolution.
pub fn blur_dimensions(framebuffer: UVec2, downscale: u32) -> UVec2 {
    (framebuffer / downscale.max(1)).max(UVec2::ONE)
}

// ============================================================================
// Kawase
// ============================================================================

/// Per-iteration sample offsets for a Kawase blur.
#[derive(Clone, Debug, PartialEq)]
pub struct KawaseSchedule {
    pub kernels: Vec<u32>,
    /// Four `(x, y)` UV offsets per iteration.
    pub offsets: Vec<[[f32; 2]; 4]>,
}

impl KawaseSchedule {
    pub fn new(kernels: &[u32], dimensions: UVec2) -> Self {
        let kernels: Vec<u32> = kernels.iter().copied().take(MAX_KAWASE_ITERATIONS).collect();
        let pixel = Vec2::ONE / dimensions.max(UVec2::ONE).as_vec2();
        let half_pixel = pixel * 0.5;
        let offsets = kernels
            .iter()
            .map(|k| {
                let d = pixel * *k as f32 + half_pixel;
                [[-d.x, d.y], [d.x, d.y], [d.x, -d.y], [-d.x, -d.y]]
            })
            .collect();
        Self { kernels, offsets }
    }

    pub fn iterations(&self) -> usize {
        self.kernels.len()
    }

    /// Ping-pong slot holding the final result.
    pub fn blurred_image_index(&self) -> usize {
        crate::ping_pong::result_slot(self.iterations())
    }
}

// ============================================================================
// Dual and tent filters
// ============================================================================

/// Resolution of each of the [`MAX_FILTER_ITERATIONS`] filter levels.
///
/// Down levels `0..5` double from `ceil(fb / 32)`, up levels `5..9` double
/// from `ceil(fb / 16)` and the last level is the framebuffer itself, so a
/// schedule with fewer iterations uses the largest down levels and the
/// largest up levels.
pub fn filter_level_dimensions(framebuffer: UVec2) -> Vec<UVec2> {
    let half = MAX_FILTER_ITERATIONS / 2;
    let fb = framebuffer.max(UVec2::ONE).as_vec2();
    let mut levels = vec![UVec2::ONE; MAX_FILTER_ITERATIONS as usize];

    let mut dimension = (fb / 2f32.powi(half as i32)).ceil();
    for i in (0..half as usize).rev() {
        levels[i] = dimension.as_uvec2();
        dimension = (dimension * 2.0).ceil();
    }

    let mut dimension = (fb / 2f32.powi(half as i32 - 1)).ceil();
    for level in levels
        .iter_mut()
        .take(MAX_FILTER_ITERATIONS as usize - 1)
        .skip(half as usize)
    {
        *level = dimension.as_uvec2();
        dimension = (dimension * 2.0).ceil();
    }

    levels[MAX_FILTER_ITERATIONS as usize - 1] = framebuffer.max(UVec2::ONE);
    levels
}

/// Where a filter step reads from or writes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FilterTexture {
    /// Full-resolution luminance from the scene pass.
    Luminance,
    /// Filter level texture `n`.
    Level(usize),
    /// The output image.
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FilterStepKind {
    Down,
    /// First tent upsample: plain bilinear magnification of the smallest level.
    FirstUp,
    Up,
    /// Last upsample, merged with the composite.
    Final,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilterStep {
    pub kind: FilterStepKind,
    pub dimensions: UVec2,
    pub source: FilterTexture,
    /// Extra texture added in (tent filter only).
    pub add: Option<FilterTexture>,
    pub target: FilterTexture,
    /// UV offsets (4 for down steps, 8 for up steps).
    pub offsets: Vec<[f32; 2]>,
}

/// Ordered steps of a dual or tent filter.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilterSchedule {
    pub iterations: u32,
    pub steps: Vec<FilterStep>,
    /// Dimensions of every level texture this schedule needs, by level index.
    pub level_dimensions: Vec<UVec2>,
}

impl FilterSchedule {
    pub fn down_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.kind == FilterStepKind::Down).count()
    }

    pub fn up_steps(&self) -> usize {
        self.steps.len() - self.down_steps()
    }
}

fn clamp_filter_iterations(iterations: u32) -> u32 {
    let n = iterations.clamp(2, MAX_FILTER_ITERATIONS);
    n - n % 2
}

/// Resolution used by step `i` of an `n`-step filter.
fn step_dimensions(levels: &[UVec2], n: u32, i: u32) -> UVec2 {
    if i < n / 2 {
        levels[i as usize]
    } else {
        levels[(MAX_FILTER_ITERATIONS - n + i) as usize]
    }
}

fn dual_down_offsets(dimensions: UVec2) -> Vec<[f32; 2]> {
    let pixel = Vec2::ONE / dimensions.as_vec2();
    let d = pixel + pixel * 0.5;
    vec![[-d.x, -d.y], [d.x, d.y], [d.x, -d.y], [-d.x, d.y]]
}

fn dual_up_offsets(dimensions: UVec2) -> Vec<[f32; 2]> {
    let pixel = Vec2::ONE / dimensions.as_vec2();
    let d = pixel + pixel * 0.5;
    vec![
        [-d.x * 2.0, 0.0],
        [-d.x, d.y],
        [0.0, d.y * 2.0],
        [d.x, d.y],
        [d.x * 2.0, 0.0],
        [d.x, -d.y],
        [0.0, -d.y * 2.0],
        [-d.x, -d.y],
    ]
}

const TENT_OFFSETS: [[f32; 2]; 8] = [
    [-1.0, 1.0],
    [0.0, 1.0],
    [1.0, 1.0],
    [1.0, 0.0],
    [1.0, -1.0],
    [0.0, -1.0],
    [-1.0, -1.0],
    [-1.0, 0.0],
];

/// Per-level tent radius scale.
const TENT_SCALES: [[f32; 2]; (MAX_FILTER_ITERATIONS / 2) as usize] = [[1.0, 1.0]; 5];

fn tent_offsets(dimensions: UVec2, scale: [f32; 2]) -> Vec<[f32; 2]> {
    let step = Vec2::ONE / (dimensions.as_vec2() * 0.5);
    TENT_OFFSETS
        .iter()
        .map(|o| (step * Vec2::from_array(*o) * Vec2::from_array(scale)).to_array())
        .collect()
}

/// Dual filter: `n/2` filtered downsamples then `n/2` filtered upsamples.
///
/// Up steps write back into the down level textures (largest first), which
/// are no longer needed once the next smaller level has been produced; the
/// last step renders to the output.
pub fn dual_filter_schedule(framebuffer: UVec2, iterations: u32) -> FilterSchedule {
    let n = clamp_filter_iterations(iterations);
    let half = n / 2;
    let levels = filter_level_dimensions(framebuffer);
    let mut steps = Vec::with_capacity(n as usize);

    for i in 0..half {
        let dimensions = step_dimensions(&levels, n, i);
        steps.push(FilterStep {
            kind: FilterStepKind::Down,
            dimensions,
            source: if i == 0 {
                FilterTexture::Luminance
            } else {
                FilterTexture::Level(i as usize - 1)
            },
            add: None,
            target: FilterTexture::Level(i as usize),
            offsets: dual_down_offsets(dimensions),
        });
    }

    let mut previous = FilterTexture::Level(half as usize - 1);
    for i in half..n {
        let is_final = i == n - 1;
        // Up step j reuses down level (n/2 - 2 - j) at that level's resolution.
        let (target, dimensions) = if is_final {
            (FilterTexture::Output, framebuffer.max(UVec2::ONE))
        } else {
            let level = (n - 2 - i) as usize;
            (FilterTexture::Level(level), levels[level])
        };
        steps.push(FilterStep {
            kind: if is_final {
                FilterStepKind::Final
            } else {
                FilterStepKind::Up
            },
            dimensions,
            source: previous,
            add: None,
            target,
            offsets: dual_up_offsets(dimensions),
        });
        previous = target;
    }

    FilterSchedule {
        iterations: n,
        steps,
        level_dimensions: levels[..half as usize].to_vec(),
    }
}

/// Tent filter: `n/2` 4x4 box downsamples, then tent-filtered upsamples
/// that add back the matching down level. Every step owns its texture.
pub fn tent_filter_schedule(framebuffer: UVec2, iterations: u32) -> FilterSchedule {
    let n = clamp_filter_iterations(iterations);
    let half = n / 2;
    let levels = filter_level_dimensions(framebuffer);
    let mut steps = Vec::with_capacity(n as usize);
    // Level textures: down levels keep their index, up step i uses index (10 - n + i).
    let up_level = |i: u32| (MAX_FILTER_ITERATIONS - n + i) as usize;

    for i in 0..half {
        let dimensions = levels[i as usize];
        let source_dimensions = if i == 0 {
            framebuffer
        } else {
            levels[i as usize - 1]
        };
        steps.push(FilterStep {
            kind: FilterStepKind::Down,
            dimensions,
            source: if i == 0 {
                FilterTexture::Luminance
            } else {
                FilterTexture::Level(i as usize - 1)
            },
            add: None,
            target: FilterTexture::Level(i as usize),
            offsets: downsample_4x4_offsets(source_dimensions, dimensions).to_vec(),
        });
    }

    let mut previous = FilterTexture::Level(half as usize - 1);
    for i in half..n {
        let j = i - half;
        let dimensions = step_dimensions(&levels, n, i);
        let is_final = i == n - 1;
        let scale = TENT_SCALES[(j as usize).min(TENT_SCALES.len() - 1)];
        let (kind, add, target) = if is_final {
            // With a single down level the source already is level 0.
            let add = (j > 0).then_some(FilterTexture::Level(0));
            (FilterStepKind::Final, add, FilterTexture::Output)
        } else if j == 0 {
            (FilterStepKind::FirstUp, None, FilterTexture::Level(up_level(i)))
        } else {
            (
                FilterStepKind::Up,
                Some(FilterTexture::Level((half - 1 - j) as usize)),
                FilterTexture::Level(up_level(i)),
            )
        };
        steps.push(FilterStep {
            kind,
            dimensions,
            source: previous,
            add,
            target,
            offsets: tent_offsets(dimensions, scale),
        });
        previous = target;
    }

    FilterSchedule {
        iterations: n,
        steps,
        level_dimensions: levels[..MAX_FILTER_ITERATIONS as usize - 1].to_vec(),
    }
}

// ============================================================================
// Environments
// ============================================================================

/// Lighting environment for the bloom demo.
///
/// The sky is a three-colour gradient (ground, horizon, zenith) standing in
/// for the irradiance map; exposure is derived from its average luminance.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Environment {
    pub name: &'static str,
    pub key_value: f32,
    pub threshold: f32,
    pub zenith: [f32; 3],
    pub horizon: [f32; 3],
    pub ground: [f32; 3],
}

pub const ENVIRONMENTS: [Environment; 3] = [
    Environment {
        name: "Satara Night",
        key_value: 9.0,
        threshold: 2.6,
        zenith: [0.004, 0.006, 0.02],
        horizon: [0.05, 0.04, 0.06],
        ground: [0.006, 0.005, 0.004],
    },
    Environment {
        name: "Pink Sunrise",
        key_value: 50.0,
        threshold: 0.65,
        zenith: [0.35, 0.45, 0.9],
        horizon: [2.4, 1.1, 1.3],
        ground: [0.25, 0.18, 0.16],
    },
    Environment {
        name: "Signal Hill Sunrise",
        key_value: 23.0,
        threshold: 0.85,
        zenith: [0.5, 0.7, 1.2],
        horizon: [3.0, 2.2, 1.2],
        ground: [0.3, 0.26, 0.2],
    },
];

/// Rec. 709 luma with a floor so exposure never divides by zero.
pub fn luma(color: Vec3) -> f32 {
    color.dot(Vec3::new(0.2126, 0.7152, 0.0722)).max(0.0001)
}

impl Environment {
    /// Sky radiance in direction `dir` (normalized).
    pub fn sky(&self, dir: Vec3) -> Vec3 {
        let zenith = Vec3::from_array(self.zenith);
        let horizon = Vec3::from_array(self.horizon);
        let ground = Vec3::from_array(self.ground);
        if dir.y >= 0.0 {
            horizon.lerp(zenith, dir.y.sqrt())
        } else {
            horizon.lerp(ground, (-dir.y).sqrt())
        }
    }

    /// Mean luma of the sky over the sphere, in 8-bit texel units.
    ///
    /// Key values are calibrated against 0..255 irradiance averages while
    /// shaders see 0..1 colours, so the exposed scene stays well below the
    /// key value itself.
    pub fn average_luminance(&self) -> f32 {
        const STEPS: usize = 64;
        let mut total = 0.0;
        // Uniform in y = cos(theta) covers the sphere uniformly.
        for i in 0..STEPS {
            let y = -1.0 + (i as f32 + 0.5) * 2.0 / STEPS as f32;
            total += luma(self.sky(Vec3::new((1.0 - y * y).sqrt(), y, 0.0)));
        }
        (255.0 * total / STEPS as f32).max(0.0001)
    }

    pub fn linear_exposure(&self) -> f32 {
        self.key_value / self.average_luminance()
    }
}

pub fn environment(index: usize) -> &'static Environment {
    ENVIRONMENTS.get(index).unwrap_or(&ENVIRONMENTS[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_cycle() {
        assert_eq!(BloomMode::TentFilter.next(), BloomMode::NoBloom);
        assert_eq!(BloomMode::NoBloom.previous(), BloomMode::TentFilter);
        for mode in BloomMode::ALL {
            assert_eq!(mode.next().previous(), mode);
            assert_eq!(BloomMode::from_index(mode.index()), Some(mode));
        }
        assert_eq!(BloomMode::from_index(BloomMode::COUNT), None);
        assert_eq!(BloomMode::default(), BloomMode::GaussianLinearTruncated);
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(
            blur_description(BloomMode::GaussianLinearTruncated, 2),
            "Truncated Gaussian (Linear Sampling)\nKernel Size = 17 (5 + 5 taps)"
        );
        assert_eq!(
            blur_description(BloomMode::Kawase, 2),
            "Kawase\n4 Iterations: 0,0,1,1"
        );
        assert_eq!(
            blur_description(BloomMode::DualFilter, 1),
            "Dual Filter\nIterations = 4 (2 Downsamples, 2 Upsamples)"
        );
        assert_eq!(
            blur_description(BloomMode::NoBloom, 4),
            "Original Image (No Post Processing)"
        );
        assert!(blur_description(BloomMode::GaussianOriginal, 0).ends_with("Kernel Size = 5 (3 + 3 taps)"));
    }

    #[test]
    fn test_kawase_offsets() {
        let schedule = KawaseSchedule::new(&[0, 0, 1, 1], UVec2::new(100, 50));
        assert_eq!(schedule.iterations(), 4);
        assert_eq!(schedule.blurred_image_index(), 0);
        let first = schedule.offsets[0];
        assert!((first[1][0] - 0.005).abs() < 1e-6);
        assert!((first[1][1] - 0.01).abs() < 1e-6);
        let third = schedule.offsets[2];
        assert!((third[0][0] + 0.015).abs() < 1e-6);
        assert!((third[0][1] - 0.03).abs() < 1e-6);

        let odd = KawaseSchedule::new(&[0, 0, 1], UVec2::new(100, 50));
        assert_eq!(odd.blurred_image_index(), 1);
    }

    #[test]
    fn test_filter_levels() {
        let levels = filter_level_dimensions(UVec2::new(800, 600));
        assert_eq!(levels[4], UVec2::new(25, 19));
        assert_eq!(levels[0], UVec2::new(400, 304));
        assert_eq!(levels[5], UVec2::new(50, 38));
        assert_eq!(levels[8], UVec2::new(400, 304));
        assert_eq!(levels[9], UVec2::new(800, 600));
    }

    #[test]
    fn test_dual_filter_four_iterations() {
        let schedule = dual_filter_schedule(UVec2::new(800, 600), 4);
        assert_eq!(schedule.down_steps(), 2);
        assert_eq!(schedule.up_steps(), 2);
        let last = schedule.steps.last().unwrap();
        assert_eq!(last.kind, FilterStepKind::Final);
        assert_eq!(last.target, FilterTexture::Output);
        assert_eq!(last.dimensions, UVec2::new(800, 600));

        let up = &schedule.steps[2];
        assert_eq!(up.source, FilterTexture::Level(1));
        assert_eq!(up.target, FilterTexture::Level(0));
        assert_eq!(up.dimensions, schedule.level_dimensions[0]);
        assert_eq!(schedule.steps[3].source, FilterTexture::Level(0));
    }

    #[test]
    fn test_filter_steps_never_read_their_target() {
        for n in (2..=MAX_FILTER_ITERATIONS).step_by(2) {
            for schedule in [
                dual_filter_schedule(UVec2::new(1280, 720), n),
                tent_filter_schedule(UVec2::new(1280, 720), n),
            ] {
                assert_eq!(schedule.steps.len(), n as usize);
                for step in &schedule.steps {
                    assert_ne!(step.source, step.target);
                    assert_ne!(step.add, Some(step.target));
                    if let FilterTexture::Level(l) = step.target {
                        assert!(l < schedule.level_dimensions.len());
                        assert_eq!(schedule.level_dimensions[l], step.dimensions);
                    }
                }
            }
        }
    }

    #[test]
    fn test_tent_filter_adds_down_levels() {
        let schedule = tent_filter_schedule(UVec2::new(800, 600), 6);
        assert_eq!(schedule.steps[3].kind, FilterStepKind::FirstUp);
        assert_eq!(schedule.steps[3].source, FilterTexture::Level(2));
        assert_eq!(schedule.steps[4].add, Some(FilterTexture::Level(1)));
        assert_eq!(schedule.steps[5].add, Some(FilterTexture::Level(0)));
        assert_eq!(schedule.steps[5].target, FilterTexture::Output);
    }

    #[test]
    fn test_downsample_offsets() {
        let offsets = downsample_4x4_offsets(UVec2::new(800, 600), UVec2::new(200, 150));
        assert!((offsets[3][0] - 1.0 / 800.0).abs() < 1e-7);
        assert!((offsets[0][1] + 1.0 / 600.0).abs() < 1e-7);
    }

    #[test]
    fn test_downsample_filter_selection() {
        let fb = UVec2::new(1280, 720);
        assert_eq!(DownsampleFilter::select(fb, blur_dimensions(fb, 4)), DownsampleFilter::Box4x4);
        assert_eq!(DownsampleFilter::select(fb, blur_dimensions(fb, 2)), DownsampleFilter::Box2x2);
        assert_eq!(DownsampleFilter::select(fb, fb), DownsampleFilter::Box2x2);
    }

    #[test]
    fn test_exposure() {
        for env in &ENVIRONMENTS {
            let exposure = env.linear_exposure();
            assert!(exposure.is_finite() && exposure > 0.0);
            assert!((exposure * env.average_luminance() - env.key_value).abs() < 1e-3);
        }
        assert!((luma(Vec3::ZERO) - 0.0001).abs() < 1e-9);
    }

    #[test]
    fn test_cycler() {
        let mut cycler = DemoCycler::new(BloomMode::GaussianLinearTruncated, 3, 0);
        assert!(!cycler.advance(1000.0));
        assert!(cycler.advance(600.0));
        assert_eq!(cycler.configuration, 4);
        assert_eq!(cycler.mode, BloomMode::GaussianLinearTruncated);
        assert!(cycler.advance(1600.0));
        assert_eq!(cycler.configuration, 0);
        assert_eq!(cycler.mode, BloomMode::Kawase);
    }

    #[test]
    fn test_kernels_for_modes() {
        let config = demo_configuration(2);
        let hybrid = kernels_for(BloomMode::HybridGaussian, config).unwrap();
        assert_eq!(hybrid.horizontal.kernel_size, 25);
        assert!(!hybrid.horizontal.linear_sampling);
        assert_eq!(hybrid.vertical.kernel_size, 17);
        assert!(hybrid.vertical.linear_sampling);
        assert!(kernels_for(BloomMode::Kawase, config).is_none());
    }
}
