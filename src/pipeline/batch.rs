//! Batch inference pipeline
//!
//! Removes the background from every matching file in a directory. Inputs are
//! enumerated up front and fed through a bounded queue to a fixed set of
//! workers; each worker reads, infers, composites and writes one item at a
//! time. A failed item is recorded and the batch moves on.

use crate::{
    config::BatchConfig,
    context::InferenceContext,
    error::{DispatchError, Result},
    inference::InferenceBackend,
    services::{remove_background_with_backend, Compositor, ProgressReporter, ProgressTracker},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// An input that could not be processed
#[derive(Debug)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub error: DispatchError,
}

impl ItemFailure {
    /// Convert into a `DispatchError::Item`
    #[must_use]
    pub fn into_error(self) -> DispatchError {
        DispatchError::item(self.path, self.error)
    }
}

impl std::fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

/// Outcome of a batch run
///
/// `processed` holds output paths in completion order, which is not the input
/// order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: Vec<PathBuf>,
    pub failures: Vec<ItemFailure>,
    pub elapsed: Duration,
}

impl BatchReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.processed.len() + self.failures.len()
    }

    /// Whether every input was processed
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

type SharedInputs = Arc<tokio::sync::Mutex<mpsc::Receiver<PathBuf>>>;

/// Runs background removal over a directory of images with bounded parallelism
pub struct BatchInferencePipeline<B: ?Sized> {
    backend: Arc<B>,
    compositor: Arc<dyn Compositor>,
    config: BatchConfig,
}

impl<B: InferenceBackend + ?Sized + 'static> BatchInferencePipeline<B> {
    #[must_use]
    pub fn new(backend: Arc<B>, compositor: Arc<dyn Compositor>, config: BatchConfig) -> Self {
        Self {
            backend,
            compositor,
            config,
        }
    }

    /// List the inputs matching the configured pattern, sorted by path
    ///
    /// Only the pattern is glob syntax; `input_dir` is matched literally.
    ///
    /// # Errors
    /// - The pattern is not a valid glob
    /// - `DispatchError::NoInputs` if nothing matches
    pub fn enumerate_inputs(&self, input_dir: &Path) -> Result<Vec<PathBuf>> {
        let dir = glob::Pattern::escape(&input_dir.to_string_lossy());
        let pattern = Path::new(&dir).join(&self.config.pattern);
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern).map_err(|e| {
            DispatchError::invalid_config(format!("invalid batch pattern '{}': {}", pattern, e))
        })?;

        let mut inputs: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("skipping unreadable batch entry: {}", e);
                    None
                },
            })
            .filter(|path| path.is_file())
            .collect();
        inputs.sort();

        if inputs.is_empty() {
            return Err(DispatchError::NoInputs(format!(
                "no files matching '{}'",
                pattern
            )));
        }
        Ok(inputs)
    }

    /// Process every matching input in `input_dir`, writing results to `output_dir`
    ///
    /// Outputs keep their input file name. Per-item failures end up in the
    /// report; only setup errors and cancellation fail the whole run.
    ///
    /// # Errors
    /// - `DispatchError::NoInputs` if nothing matches
    /// - The output directory cannot be created
    /// - `DispatchError::Cancelled` if `ctx` is done before the batch finishes
    #[instrument(skip_all, fields(input_dir = %input_dir.display(), output_dir = %output_dir.display()))]
    pub async fn run(
        &self,
        ctx: &InferenceContext,
        input_dir: &Path,
        output_dir: &Path,
    ) -> Result<BatchReport> {
        self.run_with_progress(ctx, input_dir, output_dir, None).await
    }

    /// Like [`run`](Self::run), reporting each finished item to `progress`
    ///
    /// The tracker is built for the enumerated input count.
    ///
    /// # Errors
    /// Same as [`run`](Self::run).
    pub async fn run_with_progress(
        &self,
        ctx: &InferenceContext,
        input_dir: &Path,
        output_dir: &Path,
        progress: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<BatchReport> {
        let start = Instant::now();
        let inputs = self.enumerate_inputs(input_dir)?;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| DispatchError::file_io_error("create output directory", output_dir, e))?;

        let tracker = Arc::new(match progress {
            Some(reporter) => ProgressTracker::new(reporter, inputs.len()),
            None => ProgressTracker::no_op(inputs.len()),
        });
        let workers = self.config.worker_count().min(inputs.len());
        let (tx, rx) = mpsc::channel(workers.saturating_mul(2));
        let queue: SharedInputs = Arc::new(tokio::sync::Mutex::new(rx));
        debug!(inputs = inputs.len(), workers, "starting batch");

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let worker = BatchWorker {
                    id,
                    backend: Arc::clone(&self.backend),
                    compositor: Arc::clone(&self.compositor),
                    item_timeout: self.config.item_timeout(),
                    output_dir: output_dir.to_path_buf(),
                    tracker: Arc::clone(&tracker),
                };
                tokio::spawn(worker.run(ctx.clone(), Arc::clone(&queue)))
            })
            .collect();
        drop(queue);

        for input in inputs {
            let sent = tokio::select! {
                sent = tx.send(input) => sent.is_ok(),
                _ = ctx.done() => false,
            };
            if !sent {
                break;
            }
        }
        drop(tx);

        let mut report = BatchReport::default();
        for handle in handles {
            let (processed, failures) = handle.await?;
            report.processed.extend(processed);
            report.failures.extend(failures);
        }
        if let Some(reason) = ctx.err() {
            return Err(DispatchError::Cancelled(reason));
        }

        report.elapsed = start.elapsed();
        info!(
            processed = report.processed.len(),
            failed = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "batch complete"
        );
        Ok(report)
    }
}

struct BatchWorker<B: ?Sized> {
    id: usize,
    backend: Arc<B>,
    compositor: Arc<dyn Compositor>,
    item_timeout: Duration,
    output_dir: PathBuf,
    tracker: Arc<ProgressTracker>,
}

impl<B: InferenceBackend + ?Sized> BatchWorker<B> {
    async fn run(
        self,
        ctx: InferenceContext,
        queue: SharedInputs,
    ) -> (Vec<PathBuf>, Vec<ItemFailure>) {
        let mut processed = Vec::new();
        let mut failures = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.done() => None,
                path = async { queue.lock().await.recv().await } => path,
            };
            let Some(path) = next else { break };

            let name = path.file_name().map_or_else(
                || path.display().to_string(),
                |n| n.to_string_lossy().into_owned(),
            );
            match self.process(&ctx, &path).await {
                Ok(output) => {
                    self.tracker.record_success(&name);
                    processed.push(output);
                },
                Err(error) => {
                    warn!(worker = self.id, path = %path.display(), "item failed: {}", error);
                    self.tracker.record_failure(&name, &error.to_string());
                    failures.push(ItemFailure { path, error });
                },
            }
        }
        debug!(worker = self.id, processed = processed.len(), "batch worker exiting");
        (processed, failures)
    }

    async fn process(&self, ctx: &InferenceContext, path: &Path) -> Result<PathBuf> {
        let file_name = path
            .file_name()
            .ok_or_else(|| DispatchError::internal("input path has no file name"))?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DispatchError::file_io_error("read input", path, e))?;

        let item_ctx = ctx.child_with_timeout(self.item_timeout);
        let output = remove_background_with_backend(
            &item_ctx,
            self.backend.as_ref(),
            Arc::clone(&self.compositor),
            bytes,
        )
        .await?;

        let output_path = self.output_dir.join(file_name);
        tokio::fs::write(&output_path, output)
            .await
            .map_err(|e| DispatchError::file_io_error("write output", &output_path, e))?;
        Ok(output_path)
    }
}
