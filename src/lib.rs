#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # rembg-dispatch
//!
//! Concurrent dispatch of background-removal inference to remote model servers.
//!
//! The crate does not run models itself. It sends encoded images to a
//! SageMaker endpoint or a Triton inference server, composites the returned
//! mask onto the source image, and provides the concurrency around those
//! calls:
//!
//! - **Backends**: SageMaker, Triton HTTP (binary tensor extension) and Triton gRPC
//! - **Single-shot dispatch**: one call on its own task, result on a one-shot channel
//! - **Worker pool**: a fixed number of workers over a bounded queue, itself a backend
//! - **Frame extraction**: decode frames once, persist them with parallel writers
//! - **Batch inference**: bounded-parallel background removal over a directory
//!
//! Every call takes an [`InferenceContext`] carrying cancellation and an
//! optional deadline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rembg_dispatch::{
//!     Backend, BackendKind, DispatchConfig, InferenceBackend, InferenceContext, PooledBackend,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = DispatchConfig::builder()
//!     .backend_kind(BackendKind::TritonHttp)
//!     .address("localhost:8000")
//!     .workers(4)
//!     .build()?;
//!
//! let backend = Backend::from_config(&config.backend).await?;
//! let pool = PooledBackend::with_config(backend, &config.pool)?;
//!
//! let ctx = InferenceContext::with_timeout(config.request_timeout());
//! let mask = pool.infer(&ctx, &std::fs::read("input.png")?).await?;
//! pool.shutdown().await;
//! # let _ = mask;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `sagemaker` (default): SageMaker runtime backend
//! - `triton-grpc` (default): Triton gRPC backend
//! - `cli` (default): the `rembg` binary, tracing setup and progress display
//! - `video-ffmpeg`: FFmpeg video source for frame extraction
//! - `tracing-json`: JSON log output for the binary
//!
//! To use only as a library:
//!
//! ```toml
//! [dependencies]
//! rembg-dispatch = { version = "0.1", default-features = false, features = ["triton-grpc"] }
//! ```

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod pool;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod utils;
pub mod video;

pub use backends::Backend;
pub use config::{
    BackendConfig, BackendKind, BatchConfig, DispatchConfig, DispatchConfigBuilder,
    ExtractionConfig, PoolConfig,
};
pub use context::{CancelReason, InferenceContext};
pub use dispatch::{await_result, infer_async, InferenceJob, InferenceResult, ResultReceiver};
pub use error::{DispatchError, Result};
pub use inference::InferenceBackend;
pub use pipeline::{
    BatchInferencePipeline, BatchReport, ExtractionSummary, FrameExtractionPipeline, ItemFailure,
};
pub use pool::{PooledBackend, DEFAULT_POOL_WORKERS};
pub use services::{
    remove_background_with_backend, AlphaMaskCompositor, BackgroundColor, BatchProgressUpdate,
    CompositeOptions, Compositor, NoOpProgressReporter, ProgressReporter, ProgressTracker,
};
pub use utils::TensorDataType;
pub use video::{BackendTransform, FrameTransform, VecSource, VideoFrame, VideoSource};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};
