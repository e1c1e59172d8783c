//! Single-shot asynchronous dispatch and the job type shared with the pool
//!
//! Both [`infer_async`] and the pool workers end a call the same way: the
//! outcome is handed to [`InferenceJob::deliver`], which sends the job's
//! context error instead of the outcome if the context is already done.

use crate::{
    context::InferenceContext,
    error::{DispatchError, Result},
    inference::InferenceBackend,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::trace;

/// Outcome of one inference call; exactly one is produced per job
pub type InferenceResult = Result<Vec<u8>>;

/// Receiving half of a job's single-use result channel
pub type ResultReceiver = oneshot::Receiver<InferenceResult>;

/// One unit of dispatch work
///
/// Owned by the dispatch path from submission until [`deliver`](Self::deliver)
/// consumes it.
#[derive(Debug)]
pub struct InferenceJob {
    pub(crate) ctx: InferenceContext,
    pub(crate) payload: Vec<u8>,
    respond_to: oneshot::Sender<InferenceResult>,
}

impl InferenceJob {
    /// Create a job and the receiver its result will arrive on
    #[must_use]
    pub fn new(ctx: InferenceContext, payload: Vec<u8>) -> (Self, ResultReceiver) {
        let (respond_to, rx) = oneshot::channel();
        (
            Self {
                ctx,
                payload,
                respond_to,
            },
            rx,
        )
    }

    #[must_use]
    pub fn context(&self) -> &InferenceContext {
        &self.ctx
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Run the job against `backend`, skipping the call if the context is already done
    pub async fn run<B: InferenceBackend + ?Sized>(self, backend: &B) {
        let result = match self.ctx.check() {
            Ok(()) => backend.infer(&self.ctx, &self.payload).await,
            Err(e) => Err(e),
        };
        self.deliver(result);
    }

    /// Deliver the outcome, or a cancellation error if the context is done
    ///
    /// Never blocks: the channel holds one value, and a receiver that has
    /// gone away simply means the result is discarded.
    pub fn deliver(self, result: InferenceResult) {
        let outcome = match self.ctx.err() {
            Some(reason) => Err(DispatchError::Cancelled(reason)),
            None => result,
        };
        if self.respond_to.send(outcome).is_err() {
            trace!("result receiver dropped, discarding inference result");
        }
    }
}

/// Run one `infer` call on its own task and return the channel its result arrives on
///
/// The channel always receives exactly one value. Must be called from within a
/// tokio runtime.
pub fn infer_async<B>(ctx: &InferenceContext, backend: Arc<B>, payload: Vec<u8>) -> ResultReceiver
where
    B: InferenceBackend + ?Sized + 'static,
{
    let (job, rx) = InferenceJob::new(ctx.clone(), payload);
    tokio::spawn(async move {
        job.run(backend.as_ref()).await;
    });
    rx
}

/// Wait for a result channel or for `ctx` to be done, whichever comes first
pub async fn await_result(ctx: &InferenceContext, rx: ResultReceiver) -> InferenceResult {
    tokio::select! {
        received = rx => received.unwrap_or_else(|_| {
            Err(DispatchError::internal("result channel closed without a value"))
        }),
        reason = ctx.done() => Err(DispatchError::Cancelled(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::MockBackend;
    use crate::context::CancelReason;
    use std::time::Duration;

    #[tokio::test]
    async fn test_infer_async_delivers_backend_response() {
        let backend = Arc::new(MockBackend::with_response(b"mask".to_vec()));
        let ctx = InferenceContext::with_timeout(Duration::from_secs(5));

        let rx = infer_async(&ctx, backend.clone(), b"image".to_vec());
        let result = rx.await.expect("exactly one value is delivered");

        assert_eq!(result.unwrap(), b"mask");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_infer_async_forwards_backend_error_verbatim() {
        let backend = Arc::new(MockBackend::failing());
        let ctx = InferenceContext::with_timeout(Duration::from_secs(5));

        let result = infer_async(&ctx, backend, b"image".to_vec()).await.unwrap();
        match result {
            Err(DispatchError::Backend(msg)) => assert_eq!(msg, "mock inference failure"),
            other => panic!("expected backend error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_is_replaced_by_cancellation() {
        let backend = Arc::new(MockBackend::echo().delay(Duration::from_millis(200)));
        let ctx = InferenceContext::with_timeout(Duration::from_millis(50));

        let rx = infer_async(&ctx, backend.clone(), b"image".to_vec());
        let result = rx.await.unwrap();

        assert_eq!(
            result.unwrap_err().cancel_reason(),
            Some(CancelReason::DeadlineExceeded)
        );
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_result_returns_when_context_expires() {
        let backend = Arc::new(MockBackend::echo().delay(Duration::from_secs(10)));
        let ctx = InferenceContext::with_timeout(Duration::from_millis(20));

        let rx = infer_async(&ctx, backend, b"image".to_vec());
        let err = await_result(&ctx, rx).await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_abandoned_receiver_does_not_block_worker() {
        let backend = Arc::new(MockBackend::echo().delay(Duration::from_millis(10)));
        let ctx = InferenceContext::background();

        drop(infer_async(&ctx, backend.clone(), b"image".to_vec()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn test_deliver_prefers_cancellation_once_done() {
        let ctx = InferenceContext::background();
        let (job, mut rx) = InferenceJob::new(ctx.clone(), b"p".to_vec());
        ctx.cancel();

        job.deliver(Ok(b"late".to_vec()));
        let delivered = rx.try_recv().unwrap();
        assert_eq!(
            delivered.unwrap_err().cancel_reason(),
            Some(CancelReason::Canceled)
        );
    }
}
