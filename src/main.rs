use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bloomfield::config::Config;
use bloomfield::field::FieldGenerator;
use bloomfield::pipeline::{FrameRenderer, FrameStats, HeadlessRenderer, RenderPipeline, Viewport};

/// Procedural point-and-link field animation with a bloom renderer.
#[derive(Parser)]
#[command(name = "bloomfield")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (.yaml, .yml or .json); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace); RUST_LOG applies otherwise
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the animation for a fixed number of frames
    Run {
        /// Number of frames to render
        #[arg(long, default_value_t = 300)]
        frames: u64,

        /// Simulated time between frames, milliseconds
        #[arg(long, default_value_t = 16.0)]
        frame_ms: f64,

        /// Viewport width in logical pixels
        #[arg(long, default_value_t = 800)]
        width: u32,

        /// Viewport height in logical pixels
        #[arg(long, default_value_t = 600)]
        height: u32,

        /// Device pixel ratio
        #[arg(long, default_value_t = 1.0)]
        pixel_ratio: f32,

        /// RNG seed, overriding the config file
        #[arg(long)]
        seed: Option<u64>,

        /// Render with the wgpu backend
        #[arg(long)]
        gpu: bool,
    },
    /// Generate one field and write it as JSON
    Generate {
        /// Number of nodes, overriding the config file
        #[arg(long)]
        count: Option<usize>,

        /// Cube side length, overriding the config file
        #[arg(long)]
        extent: Option<f32>,

        /// Include links
        #[arg(long)]
        links: bool,

        /// RNG seed, overriding the config file
        #[arg(long)]
        seed: Option<u64>,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the effective configuration as YAML
    Config,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// Drive `pipeline` with a fixed-step clock, then tear it down
fn drive<R: FrameRenderer>(
    mut pipeline: RenderPipeline<R>,
    frames: u64,
    frame_ms: f64,
) -> anyhow::Result<FrameStats> {
    for i in 1..=frames {
        pipeline.frame(i as f64 * frame_ms)?;
    }
    let (stats, _renderer) = pipeline.teardown();
    Ok(stats)
}

#[cfg(feature = "gpu")]
fn run_gpu(
    config: &Config,
    viewport: Viewport,
    frames: u64,
    frame_ms: f64,
) -> anyhow::Result<FrameStats> {
    let renderer = bloomfield::gpu::GpuRenderer::headless()?;
    let pipeline = RenderPipeline::from_config(config, viewport, renderer)?;
    drive(pipeline, frames, frame_ms)
}

#[cfg(not(feature = "gpu"))]
fn run_gpu(_: &Config, _: Viewport, _: u64, _: f64) -> anyhow::Result<FrameStats> {
    anyhow::bail!("--gpu needs a build with the `gpu` feature")
}

#[allow(clippy::too_many_arguments)]
fn run(
    mut config: Config,
    frames: u64,
    frame_ms: f64,
    width: u32,
    height: u32,
    pixel_ratio: f32,
    seed: Option<u64>,
    gpu: bool,
) -> anyhow::Result<()> {
    if !frame_ms.is_finite() || frame_ms < 0.0 {
        anyhow::bail!("--frame-ms must be a non-negative number, got {}", frame_ms);
    }
    if seed.is_some() {
        config.seed = seed;
    }
    let viewport = Viewport::new(width, height, pixel_ratio)?;

    let started = Instant::now();
    let stats = if gpu {
        run_gpu(&config, viewport, frames, frame_ms)?
    } else {
        let pipeline = RenderPipeline::from_config(&config, viewport, HeadlessRenderer::new())?;
        drive(pipeline, frames, frame_ms)?
    };
    let wall = started.elapsed();

    println!(
        "Rendered {} frames ({:.1} s animation time, {} cycles) in {:.2?}",
        stats.frames,
        stats.total_elapsed_ms / 1000.0,
        stats.cycles_completed,
        wall
    );
    Ok(())
}

fn generate(
    config: &Config,
    count: Option<usize>,
    extent: Option<f32>,
    links: bool,
    seed: Option<u64>,
    output: Option<&PathBuf>,
) -> anyhow::Result<()> {
    let count = count.unwrap_or(config.node_count);
    let extent = extent.unwrap_or(config.extent);
    let mut generator = match seed.or(config.seed) {
        Some(seed) => FieldGenerator::seeded(seed, count, extent),
        None => FieldGenerator::from_entropy(count, extent),
    };
    let state = generator.generate(links)?;
    let json = serde_json::to_string_pretty(&state)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "Wrote {} nodes and {} links to {}",
                state.node_count(),
                state.link_count(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            frames,
            frame_ms,
            width,
            height,
            pixel_ratio,
            seed,
            gpu,
        } => run(config, frames, frame_ms, width, height, pixel_ratio, seed, gpu)?,
        Commands::Generate {
            count,
            extent,
            links,
            seed,
            output,
        } => generate(&config, count, extent, links, seed, output.as_ref())?,
        Commands::Config => print!("{}", config.to_yaml()?),
    }

    Ok(())
}
