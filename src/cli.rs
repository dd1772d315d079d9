use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use glam::UVec2;

use crate::bloom::{blur_description, BloomMode, NUM_DEMO_CONFIGURATIONS};
use crate::config::{BloomConfig, DeferredConfig, FRAME_TIME_MS};
use crate::deferred_shading::DeferredShading;
use crate::gaussian::{GaussianKernel, MINIMUM_ACCEPTABLE_COEFFICIENT};
use crate::gpu::context::{BufferUpdateStrategy, GpuContext};
use crate::post_processing::PostProcessing;
use crate::scene::{ObjScene, ProceduralScene, SceneProvider};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by the headless renderers.
#[derive(Args)]
struct OutputArgs {
    /// Output directory for frames
    #[arg(long)]
    out: PathBuf,

    /// Number of frames to render
    #[arg(long, default_value_t = 60)]
    frames: u32,

    /// Output width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Output height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// How uniform data reaches the GPU (resolved from the adapter when omitted)
    #[arg(long, value_enum)]
    buffer_update: Option<BufferUpdateStrategy>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the deferred shading demo to disk
    Deferred {
        #[command(flatten)]
        output: OutputArgs,

        /// JSON config file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// OBJ scene to render instead of the built-in one
        #[arg(long)]
        scene: Option<PathBuf>,

        /// Number of procedural point lights
        #[arg(long)]
        num_lights: Option<u32>,

        /// Point light intensity
        #[arg(long)]
        light_intensity: Option<f32>,

        /// Approximate gamma with pow(c, 1/2.2)
        #[arg(long)]
        simple_gamma: bool,

        /// Orbit the scene camera
        #[arg(long)]
        animate_camera: bool,

        /// Freeze procedural light motion
        #[arg(long)]
        pause_lights: bool,

        /// Seed for procedural lights
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Render the bloom post-processing demo to disk
    Bloom {
        #[command(flatten)]
        output: OutputArgs,

        /// JSON config file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bloom mode index (see `modes`)
        #[arg(long)]
        mode: Option<usize>,

        /// Blur size configuration index
        #[arg(long)]
        blur_size: Option<usize>,

        /// Show only the bloom contribution
        #[arg(long)]
        bloom_only: bool,

        /// Environment index
        #[arg(long)]
        environment: Option<usize>,

        /// Keep the statue and camera still
        #[arg(long)]
        no_animate: bool,

        /// Cycle through modes and blur sizes
        #[arg(long)]
        auto_cycle: bool,
    },
    /// Print a Gaussian kernel as JSON
    Kernel {
        /// Kernel size (odd, at most 51)
        #[arg(long, default_value_t = 17)]
        size: u32,

        /// Merge taps for bilinear fetches
        #[arg(long)]
        linear: bool,

        /// Drop tails below the minimum coefficient
        #[arg(long)]
        truncate: bool,

        #[arg(long, default_value_t = MINIMUM_ACCEPTABLE_COEFFICIENT)]
        min_coefficient: f64,
    },
    /// List bloom modes and blur size configurations
    Modes,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Deferred {
            output,
            config,
            scene,
            num_lights,
            light_intensity,
            simple_gamma,
            animate_camera,
            pause_lights,
            seed,
        } => {
            let mut deferred = match &config {
                Some(path) => DeferredConfig::from_json_file(path)?,
                None => DeferredConfig::default(),
            };
            if let Some(count) = num_lights {
                deferred.point_lights.num_procedural_point_lights = count;
            }
            if let Some(intensity) = light_intensity {
                deferred.point_lights.intensity = intensity;
            }
            if let Some(seed) = seed {
                deferred.seed = seed;
            }
            deferred.simple_gamma |= simple_gamma;
            deferred.animate_camera |= animate_camera;
            deferred.pause_lights |= pause_lights;

            let scene: Box<dyn SceneProvider> = match &scene {
                Some(path) => Box::new(ObjScene::load(path)?),
                None => Box::new(ProceduralScene::new()),
            };
            pollster::block_on(render_deferred(output, scene, deferred))?;
        }
        Commands::Bloom {
            output,
            config,
            mode,
            blur_size,
            bloom_only,
            environment,
            no_animate,
            auto_cycle,
        } => {
            let mut bloom = match &config {
                Some(path) => BloomConfig::from_json_file(path)?,
                None => BloomConfig::default(),
            };
            bloom.auto_cycle |= auto_cycle;
            if let Some(mode) = mode {
                bloom.mode = mode;
                bloom.auto_cycle = false;
            }
            if let Some(blur_size) = blur_size {
                bloom.blur_size = blur_size;
                bloom.auto_cycle = false;
            }
            if let Some(environment) = environment {
                bloom.environment = environment;
            }
            bloom.bloom_only |= bloom_only;
            if no_animate {
                bloom.animate = false;
            }
            pollster::block_on(render_bloom(output, bloom))?;
        }
        Commands::Kernel {
            size,
            linear,
            truncate,
            min_coefficient,
        } => {
            let kernel = GaussianKernel::generate(size, truncate, linear, min_coefficient);
            println!("{}", serde_json::to_string_pretty(&kernel)?);
        }
        Commands::Modes => {
            for mode in BloomMode::ALL {
                println!("{}: {}", mode.index(), mode.title());
                if mode == BloomMode::NoBloom {
                    continue;
                }
                for configuration in 0..NUM_DEMO_CONFIGURATIONS {
                    println!("    [{}] {}", configuration, blur_description(mode, configuration));
                }
            }
        }
    }
    Ok(())
}

fn frame_path(out_dir: &Path, frame: u32) -> PathBuf {
    out_dir.join(format!("frame_{:05}.png", frame))
}

async fn create_context(output: &OutputArgs) -> Result<GpuContext> {
    std::fs::create_dir_all(&output.out)
        .with_context(|| format!("Failed to create output directory {}", output.out.display()))?;
    let ctx = GpuContext::new_headless(output.buffer_update)
        .await
        .context("Failed to create a headless GPU device")?;
    Ok(ctx)
}

async fn render_deferred(output: OutputArgs, scene: Box<dyn SceneProvider>, config: DeferredConfig) -> Result<()> {
    let ctx = create_context(&output).await?;
    let size = UVec2::new(output.width, output.height);
    let mut demo = DeferredShading::new(&ctx, scene, &config, size)?;

    log::info!("Rendering {} frames to {}", output.frames, output.out.display());
    for frame in 0..output.frames {
        demo.render_frame(&ctx, FRAME_TIME_MS)?;
        let path = frame_path(&output.out, frame);
        demo.save_frame(&ctx, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    log::info!("Done.");
    Ok(())
}

async fn render_bloom(output: OutputArgs, config: BloomConfig) -> Result<()> {
    let ctx = create_context(&output).await?;
    let size = UVec2::new(output.width, output.height);
    let mut demo = PostProcessing::new(&ctx, &config, size)?;

    log::info!("Rendering {} frames to {}", output.frames, output.out.display());
    for frame in 0..output.frames {
        demo.render_frame(&ctx, FRAME_TIME_MS)?;
        let path = frame_path(&output.out, frame);
        demo.save_frame(&ctx, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    log::info!("Done.");
    Ok(())
}
