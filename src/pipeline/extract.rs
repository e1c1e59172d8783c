//! Frame extraction pipeline
//!
//! One driver reads frames sequentially from a [`VideoSource`] on a blocking
//! thread, optionally transforms them, and hands each one to a bounded queue.
//! A fixed set of writer tasks encodes and persists the frames. The first
//! failure anywhere stops the driver and the writers and fails the run.

use crate::{
    config::ExtractionConfig,
    context::InferenceContext,
    error::{DispatchError, Result},
    services::encode_png,
    video::{FrameTransform, VideoSource},
};
use image::{DynamicImage, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace};

/// One frame waiting to be persisted
#[derive(Debug)]
pub struct FrameTask {
    pub index: u64,
    pub image: RgbaImage,
    pub path: PathBuf,
}

/// Outcome of a successful extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub frames_written: u64,
    pub elapsed: Duration,
}

type SharedTasks = Arc<tokio::sync::Mutex<mpsc::Receiver<FrameTask>>>;

/// First error of a run; later errors are dropped
#[derive(Clone)]
struct AbortSignal {
    ctx: InferenceContext,
    first: Arc<Mutex<Option<DispatchError>>>,
}

impl AbortSignal {
    fn new(ctx: InferenceContext) -> Self {
        Self {
            ctx,
            first: Arc::new(Mutex::new(None)),
        }
    }

    fn fail(&self, error: DispatchError) {
        let mut slot = self.first.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            debug!("aborting extraction: {}", error);
            *slot = Some(error);
        }
        drop(slot);
        self.ctx.cancel();
    }

    fn take(&self) -> Option<DispatchError> {
        self.first.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Extracts frames from a source into `{prefix}_{index:04}.png` files
pub struct FrameExtractionPipeline {
    output_dir: PathBuf,
    config: ExtractionConfig,
    transform: Option<Arc<dyn FrameTransform>>,
}

impl FrameExtractionPipeline {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(output_dir: P, config: ExtractionConfig) -> Self {
        Self {
            output_dir: output_dir.into(),
            config,
            transform: None,
        }
    }

    /// Apply `transform` to every frame before it is written
    #[must_use]
    pub fn with_transform(mut self, transform: Arc<dyn FrameTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Output path for the frame at `index`
    #[must_use]
    pub fn frame_path(&self, index: u64) -> PathBuf {
        frame_path(&self.output_dir, &self.config.file_prefix, index)
    }

    /// Extract every frame of `source`
    ///
    /// Frame indices are assigned by this run, start at zero and are
    /// contiguous; empty frames are skipped without consuming an index. The
    /// source is closed once reading stops.
    ///
    /// # Errors
    /// - The output directory cannot be created
    /// - `DispatchError::Stream` for the first read, transform, encode or
    ///   write failure
    /// - `DispatchError::Cancelled` if `ctx` is done before the run completes
    #[instrument(skip_all, fields(output_dir = %self.output_dir.display()))]
    pub async fn run<S>(&self, ctx: &InferenceContext, source: S) -> Result<ExtractionSummary>
    where
        S: VideoSource + 'static,
    {
        let start = Instant::now();
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| {
                DispatchError::file_io_error("create output directory", &self.output_dir, e)
            })?;

        let writers = self.config.writer_count();
        let (tx, rx) = mpsc::channel(self.config.queue_capacity());
        let tasks: SharedTasks = Arc::new(tokio::sync::Mutex::new(rx));
        let abort = AbortSignal::new(ctx.child());
        let written = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..writers)
            .map(|id| {
                tokio::spawn(write_frames(
                    id,
                    Arc::clone(&tasks),
                    abort.clone(),
                    Arc::clone(&written),
                ))
            })
            .collect();
        drop(tasks);
        debug!(writers, queue_capacity = self.config.queue_capacity(), "frame writers started");

        let driver = {
            let abort = abort.clone();
            let transform = self.transform.clone();
            let output_dir = self.output_dir.clone();
            let prefix = self.config.file_prefix.clone();
            tokio::task::spawn_blocking(move || {
                drive(source, tx, transform.as_deref(), &abort, &output_dir, &prefix)
            })
        };

        let driven = driver.await;
        let mut joined = Vec::with_capacity(handles.len());
        for handle in handles {
            joined.push(handle.await);
        }

        let enqueued = driven?;
        for result in joined {
            result?;
        }
        if let Some(error) = abort.take() {
            return Err(error);
        }
        if let Some(reason) = ctx.err() {
            return Err(DispatchError::Cancelled(reason));
        }

        let summary = ExtractionSummary {
            frames_written: written.load(Ordering::SeqCst),
            elapsed: start.elapsed(),
        };
        info!(
            frames = summary.frames_written,
            enqueued,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "frame extraction complete"
        );
        Ok(summary)
    }
}

fn frame_path(output_dir: &Path, prefix: &str, index: u64) -> PathBuf {
    output_dir.join(format!("{}_{:04}.png", prefix, index))
}

/// Read, transform and enqueue frames until the source ends or the run aborts
///
/// Returns the number of frames enqueued.
fn drive<S: VideoSource>(
    mut source: S,
    tx: mpsc::Sender<FrameTask>,
    transform: Option<&dyn FrameTransform>,
    abort: &AbortSignal,
    output_dir: &Path,
    prefix: &str,
) -> u64 {
    let mut index = 0u64;
    while !abort.ctx.is_done() {
        let frame = match source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                abort.fail(DispatchError::stream(index, e));
                break;
            },
        };
        if frame.is_empty() {
            trace!(frame = frame.frame_number, "skipping empty frame");
            continue;
        }
        trace!(
            frame = frame.frame_number,
            index,
            dimensions = ?frame.dimensions(),
            "frame decoded"
        );

        let frame = match transform {
            Some(transform) => match transform.apply(&abort.ctx, frame) {
                Ok(frame) => frame,
                Err(e) => {
                    abort.fail(DispatchError::stream(index, e));
                    break;
                },
            },
            None => frame,
        };

        let task = FrameTask {
            index,
            image: frame.image,
            path: frame_path(output_dir, prefix, index),
        };
        // Fails only once every writer has exited.
        if tx.blocking_send(task).is_err() {
            break;
        }
        index += 1;
    }
    drop(tx);
    source.close();
    index
}

async fn write_frames(id: usize, tasks: SharedTasks, abort: AbortSignal, written: Arc<AtomicU64>) {
    loop {
        let next = tokio::select! {
            biased;
            _ = abort.ctx.done() => None,
            task = async { tasks.lock().await.recv().await } => task,
        };
        let Some(task) = next else { break };

        let index = task.index;
        match tokio::task::spawn_blocking(move || write_frame(task)).await {
            Ok(Ok(())) => {
                written.fetch_add(1, Ordering::SeqCst);
            },
            Ok(Err(e)) => abort.fail(DispatchError::stream(index, e)),
            Err(e) => abort.fail(DispatchError::stream(index, e.into())),
        }
    }
    trace!(writer = id, "frame writer exiting");
}

fn write_frame(task: FrameTask) -> Result<()> {
    let bytes = encode_png(&DynamicImage::ImageRgba8(task.image))?;
    std::fs::write(&task.path, bytes)
        .map_err(|e| DispatchError::file_io_error("write frame", &task.path, e))?;
    trace!(index = task.index, path = %task.path.display(), "frame written");
    Ok(())
}
