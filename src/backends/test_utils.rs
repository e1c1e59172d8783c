//! Test utilities and mock backends for testing dispatch functionality
//!
//! The mock stands in for a remote model server: it can echo, return a fixed
//! response, sleep for a fixed latency, or fail for selected payloads, and it
//! records how many calls were made and how many overlapped.

use crate::{
    context::InferenceContext,
    error::{DispatchError, Result},
    inference::InferenceBackend,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock inference backend for testing
#[derive(Debug, Clone)]
pub struct MockBackend {
    /// Fixed response; `None` echoes the payload back
    response: Option<Vec<u8>>,
    /// Simulated call latency
    delay: Duration,
    /// Payloads that should fail with a backend error
    failing_payloads: Vec<Vec<u8>>,
    /// Whether every call fails
    should_fail: bool,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    /// Payload history for verification in tests
    call_history: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockBackend {
    /// Create a mock that returns its payload unchanged
    #[must_use]
    pub fn echo() -> Self {
        Self {
            response: None,
            delay: Duration::ZERO,
            failing_payloads: Vec::new(),
            should_fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always returns `response`
    #[must_use]
    pub fn with_response(response: Vec<u8>) -> Self {
        let mut backend = Self::echo();
        backend.response = Some(response);
        backend
    }

    /// Create a mock whose every call fails
    #[must_use]
    pub fn failing() -> Self {
        let mut backend = Self::echo();
        backend.should_fail = true;
        backend
    }

    /// Add simulated latency to every call
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail calls whose payload equals `payload`
    #[must_use]
    pub fn fail_on(mut self, payload: &[u8]) -> Self {
        self.failing_payloads.push(payload.to_vec());
        self
    }

    /// Number of calls that reached the backend
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at the same time
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Get the payload history for verification in tests
    pub fn get_call_history(&self) -> Vec<Vec<u8>> {
        self.call_history.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    async fn infer(&self, ctx: &InferenceContext, payload: &[u8]) -> Result<Vec<u8>> {
        ctx.check()?;

        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_history.lock().unwrap().push(payload.to_vec());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        // The simulated call is not interruptible, like a request already on the wire.
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.should_fail || self.failing_payloads.iter().any(|p| p == payload) {
            return Err(DispatchError::backend("mock inference failure"));
        }
        Ok(self.response.clone().unwrap_or_else(|| payload.to_vec()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_backend_modes() {
        let ctx = InferenceContext::background();

        let echo = MockBackend::echo();
        assert_eq!(echo.infer(&ctx, b"abc").await.unwrap(), b"abc");

        let fixed = MockBackend::with_response(vec![1, 2, 3]);
        assert_eq!(fixed.infer(&ctx, b"abc").await.unwrap(), vec![1, 2, 3]);

        let selective = MockBackend::echo().fail_on(b"bad");
        assert!(selective.infer(&ctx, b"good").await.is_ok());
        assert!(selective.infer(&ctx, b"bad").await.is_err());
        assert_eq!(selective.call_count(), 2);
        assert_eq!(selective.get_call_history(), vec![b"good".to_vec(), b"bad".to_vec()]);

        let failing = MockBackend::failing();
        assert!(matches!(
            failing.infer(&ctx, b"x").await,
            Err(DispatchError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_backend_skips_expired_context() {
        let backend = MockBackend::echo();
        let ctx = InferenceContext::background();
        ctx.cancel();

        assert!(backend.infer(&ctx, b"abc").await.unwrap_err().is_cancellation());
        assert_eq!(backend.call_count(), 0);
    }
}
