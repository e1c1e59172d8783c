//! Inference backend abstraction

use crate::{context::InferenceContext, error::Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for inference backends
///
/// A backend turns an opaque request payload (usually encoded image bytes)
/// into an opaque response (usually an encoded mask). Implementations issue
/// exactly one outbound call per invocation and never retry on their own.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run one inference call
    ///
    /// # Errors
    /// - `DispatchError::Cancelled` if `ctx` is already done, or becomes done
    ///   before the call completes
    /// - `DispatchError::Backend` for transport failures, non-success statuses
    ///   and malformed responses
    async fn infer(&self, ctx: &InferenceContext, payload: &[u8]) -> Result<Vec<u8>>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "backend"
    }
}

#[async_trait]
impl<T: InferenceBackend + ?Sized> InferenceBackend for Arc<T> {
    async fn infer(&self, ctx: &InferenceContext, payload: &[u8]) -> Result<Vec<u8>> {
        (**self).infer(ctx, payload).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<T: InferenceBackend + ?Sized> InferenceBackend for Box<T> {
    async fn infer(&self, ctx: &InferenceContext, payload: &[u8]) -> Result<Vec<u8>> {
        (**self).infer(ctx, payload).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
