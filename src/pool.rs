//! Fixed-size worker pool that bounds concurrent calls into a backend
//!
//! [`PooledBackend`] wraps any [`InferenceBackend`] and is one itself, so a
//! pool can be dropped in anywhere a plain backend is expected. The N workers
//! are the only callers of the wrapped backend, so at most N calls are ever
//! in flight regardless of how many submitters are waiting.

use crate::{
    config::PoolConfig,
    context::InferenceContext,
    dispatch::{await_result, InferenceJob},
    error::{DispatchError, Result},
    inference::InferenceBackend,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Worker count used when a pool is asked for zero workers
pub const DEFAULT_POOL_WORKERS: usize = 4;

type SharedJobs = Arc<tokio::sync::Mutex<mpsc::Receiver<InferenceJob>>>;

/// Backend wrapper running calls on a fixed set of persistent workers
pub struct PooledBackend<B> {
    backend: Arc<B>,
    /// `None` once shutdown has begun
    jobs: Mutex<Option<mpsc::Sender<InferenceJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    queue_capacity: usize,
}

impl<B: InferenceBackend + 'static> PooledBackend<B> {
    /// Wrap `backend` with `workers` workers and a queue of the same capacity
    ///
    /// A worker count of zero is corrected to [`DEFAULT_POOL_WORKERS`].
    ///
    /// # Errors
    /// - Called outside a tokio runtime
    pub fn new(backend: B, workers: usize) -> Result<Self> {
        Self::with_config(
            backend,
            &PoolConfig {
                workers,
                queue_capacity: 0,
            },
        )
    }

    /// Wrap `backend` using an explicit pool configuration
    ///
    /// # Errors
    /// - Called outside a tokio runtime
    pub fn with_config(backend: B, config: &PoolConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            DispatchError::internal(format!("worker pool requires a tokio runtime: {}", e))
        })?;

        let worker_count = if config.workers == 0 {
            DEFAULT_POOL_WORKERS
        } else {
            config.workers
        };
        let queue_capacity = if config.queue_capacity == 0 {
            worker_count
        } else {
            config.queue_capacity
        };

        let backend = Arc::new(backend);
        let (tx, rx) = mpsc::channel(queue_capacity);
        let shared: SharedJobs = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..worker_count)
            .map(|id| runtime.spawn(run_worker(id, Arc::clone(&backend), Arc::clone(&shared))))
            .collect();

        debug!(
            backend = backend.name(),
            workers = worker_count,
            queue_capacity,
            "worker pool started"
        );

        Ok(Self {
            backend,
            jobs: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            worker_count,
            queue_capacity,
        })
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Whether shutdown has begun
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stop accepting jobs, drain the queue and wait for every worker to exit
    ///
    /// Jobs already enqueued still run and deliver their results. Calling
    /// `shutdown` more than once is harmless.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn shutdown(&self) {
        let sender = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);

        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!("pool worker ended abnormally: {}", e);
            }
        }
        info!(workers = self.worker_count, "worker pool shut down");
    }

    fn sender(&self) -> Result<mpsc::Sender<InferenceJob>> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DispatchError::PoolClosed)
    }
}

#[async_trait]
impl<B: InferenceBackend + 'static> InferenceBackend for PooledBackend<B> {
    async fn infer(&self, ctx: &InferenceContext, payload: &[u8]) -> Result<Vec<u8>> {
        ctx.check()?;
        let sender = self.sender()?;

        let (job, rx) = InferenceJob::new(ctx.clone(), payload.to_vec());
        tokio::select! {
            sent = sender.send(job) => sent.map_err(|_| DispatchError::PoolClosed)?,
            reason = ctx.done() => return Err(DispatchError::Cancelled(reason)),
        }
        drop(sender);

        await_result(ctx, rx).await
    }

    fn name(&self) -> &str {
        self.backend.name()
    }
}

impl<B> Drop for PooledBackend<B> {
    fn drop(&mut self) {
        // Closing the queue lets workers finish what is queued and exit on their own.
        self.jobs
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

async fn run_worker<B: InferenceBackend>(id: usize, backend: Arc<B>, jobs: SharedJobs) {
    debug!(worker = id, "pool worker started");
    loop {
        let next = jobs.lock().await.recv().await;
        let Some(job) = next else { break };
        job.run(backend.as_ref()).await;
    }
    debug!(worker = id, "pool worker exiting");
}
