//! Background removal CLI tool
//!
//! Sends images to a remote model server and composites the returned masks.

use super::config::CliConfigBuilder;
use super::progress::SpinnerProgressReporter;
use crate::{
    backends::Backend,
    config::{BackendKind, DispatchConfig},
    context::InferenceContext,
    dispatch::{await_result, infer_async},
    pipeline::BatchInferencePipeline,
    pool::PooledBackend,
    services::{AlphaMaskCompositor, BackgroundColor, Compositor},
    tracing_config::init_cli_tracing,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Background removal through remote inference servers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "rembg")]
pub struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Backend and compositing flags shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct BackendArgs {
    /// Backend to use: sagemaker, triton_http or triton_grpc
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    /// Backend address (SageMaker endpoint name or Triton host:port)
    #[arg(long = "addr", global = true, value_name = "ADDR")]
    pub address: Option<String>,

    /// Model name served by Triton
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// AWS region for SageMaker
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Concurrent inference requests
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Write the mask instead of the cutout
    #[arg(long, global = true)]
    pub only_mask: bool,

    /// Flatten the cutout onto a solid color (#rrggbb)
    #[arg(long, global = true, value_name = "COLOR")]
    pub bg_color: Option<BackgroundColor>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Remove the background from a single image
    Image {
        input: PathBuf,
        output: PathBuf,
    },

    /// Extract video frames as numbered PNG files
    Extract {
        video: PathBuf,

        /// Directory for the extracted frames
        #[arg(long, default_value = "frames")]
        out_dir: PathBuf,

        /// Remove the background from each frame before writing it
        #[arg(long)]
        remove_bg: bool,

        /// Number of frame writers
        #[arg(long)]
        writers: Option<usize>,

        /// File name prefix for frames
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Remove backgrounds from every matching frame in a directory
    Batch {
        input_dir: PathBuf,
        output_dir: PathBuf,

        /// Glob pattern for input files inside the directory
        #[arg(long)]
        pattern: Option<String>,
    },
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let session_id =
        init_cli_tracing(cli.verbose, cli.json_logs).context("Failed to initialize tracing")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    debug!(session_id = %session_id, ?config, "configuration resolved");

    let root = InferenceContext::background();
    let interrupt = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling outstanding work");
            interrupt.cancel();
        }
    });

    match cli.command {
        Command::Image { input, output } => run_image(&root, &config, &input, &output).await,
        Command::Extract {
            video,
            out_dir,
            remove_bg,
            ..
        } => run_extract(&root, &config, &video, out_dir, remove_bg).await,
        Command::Batch {
            input_dir,
            output_dir,
            ..
        } => run_batch(&root, &config, &input_dir, &output_dir).await,
    }
}

async fn build_backend(config: &DispatchConfig) -> Result<Backend> {
    CliConfigBuilder::require_backend(config)?;
    let backend = Backend::from_config(&config.backend)
        .await
        .with_context(|| format!("Failed to create {} backend", config.backend.kind))?;
    info!(backend = %backend.kind(), address = %config.backend.address, "backend ready");
    Ok(backend)
}

async fn run_image(
    root: &InferenceContext,
    config: &DispatchConfig,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    image::guess_format(&bytes)
        .with_context(|| format!("Unsupported image format: {}", input.display()))?;
    let backend = Arc::new(build_backend(config).await?);

    let ctx = root.child_with_timeout(config.request_timeout());
    let rx = infer_async(&ctx, backend, bytes.clone());
    let mask = await_result(&ctx, rx).await.context("Inference failed")?;

    let compositor = AlphaMaskCompositor::new(config.composite);
    let composited = tokio::task::spawn_blocking(move || compositor.composite(&bytes, &mask))
        .await
        .context("Compositing task failed")?
        .context("Failed to composite mask")?;

    tokio::fs::write(output, composited)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("wrote {}", output.display());
    Ok(())
}

#[cfg(feature = "video-ffmpeg")]
async fn run_extract(
    root: &InferenceContext,
    config: &DispatchConfig,
    video: &Path,
    out_dir: PathBuf,
    remove_bg: bool,
) -> Result<()> {
    use crate::{
        pipeline::FrameExtractionPipeline,
        video::{BackendTransform, FfmpegSource},
    };

    let source = FfmpegSource::open(video)
        .with_context(|| format!("Failed to open video {}", video.display()))?;
    let mut pipeline = FrameExtractionPipeline::new(out_dir, config.extraction.clone());

    let pool = if remove_bg {
        let pool = Arc::new(
            PooledBackend::with_config(build_backend(config).await?, &config.pool)
                .context("Failed to start worker pool")?,
        );
        let compositor = Arc::new(AlphaMaskCompositor::new(config.composite));
        let transform = BackendTransform::new(Arc::clone(&pool), compositor)?
            .with_timeout(config.request_timeout());
        pipeline = pipeline.with_transform(Arc::new(transform));
        Some(pool)
    } else {
        None
    };

    let result = pipeline.run(root, source).await;
    if let Some(pool) = pool {
        pool.shutdown().await;
    }
    let summary = result.context("Frame extraction failed")?;

    println!(
        "extracted {} frames to {} in {:.2}s",
        summary.frames_written,
        pipeline.output_dir().display(),
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}

#[cfg(not(feature = "video-ffmpeg"))]
async fn run_extract(
    _root: &InferenceContext,
    _config: &DispatchConfig,
    video: &Path,
    _out_dir: PathBuf,
    _remove_bg: bool,
) -> Result<()> {
    anyhow::bail!(
        "Cannot extract {}: rebuild with the `video-ffmpeg` feature",
        video.display()
    )
}

async fn run_batch(
    root: &InferenceContext,
    config: &DispatchConfig,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<()> {
    let pool = Arc::new(
        PooledBackend::with_config(build_backend(config).await?, &config.pool)
            .context("Failed to start worker pool")?,
    );
    let compositor: Arc<dyn Compositor> = Arc::new(AlphaMaskCompositor::new(config.composite));
    let pipeline = BatchInferencePipeline::new(Arc::clone(&pool), compositor, config.batch.clone());

    let reporter = Arc::new(SpinnerProgressReporter::new());
    let result = pipeline
        .run_with_progress(root, input_dir, output_dir, Some(reporter.clone()))
        .await;
    pool.shutdown().await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            reporter.finish("aborted".to_string());
            return Err(e).with_context(|| format!("Batch over {} failed", input_dir.display()));
        },
    };
    reporter.finish(format!(
        "processed {}, failed {}",
        report.processed.len(),
        report.failures.len()
    ));

    for failure in &report.failures {
        error!("{}", failure);
    }
    info!(
        processed = report.processed.len(),
        failed = report.failures.len(),
        elapsed_secs = report.elapsed.as_secs_f64(),
        "batch summary"
    );

    if !report.is_complete() {
        anyhow::bail!(
            "{} of {} items failed",
            report.failures.len(),
            report.total()
        );
    }
    println!(
        "backgrounds removed for {} frames in {}, saved to {}",
        report.processed.len(),
        input_dir.display(),
        output_dir.display()
    );
    Ok(())
}
