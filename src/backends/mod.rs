//! Remote inference backends
//!
//! This module provides the backends the dispatch layer can talk to:
//! - SageMaker real-time endpoints (`sagemaker` feature)
//! - Triton over HTTP with the binary tensor extension
//! - Triton over gRPC (`triton-grpc` feature)
//!
//! [`Backend`] is the closed set of these, selected from a [`BackendConfig`].

#[cfg(feature = "sagemaker")]
pub mod sagemaker;

#[cfg(feature = "triton-grpc")]
pub mod triton_grpc;

pub mod triton_http;

// Test utilities for backend testing
#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "sagemaker")]
pub use self::sagemaker::SageMakerBackend;

#[cfg(feature = "triton-grpc")]
pub use self::triton_grpc::TritonGrpcBackend;

pub use self::triton_http::TritonHttpBackend;

use crate::config::{BackendConfig, BackendKind};
use crate::context::InferenceContext;
use crate::error::{DispatchError, Result};
use crate::inference::InferenceBackend;
use async_trait::async_trait;
use std::future::Future;

/// Run a backend call, failing fast on a done context and racing it afterwards
///
/// The call future is dropped if `ctx` finishes first.
pub(crate) async fn run_with_context<T, F>(ctx: &InferenceContext, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    ctx.check()?;
    tokio::select! {
        biased;
        reason = ctx.done() => Err(DispatchError::Cancelled(reason)),
        result = call => result,
    }
}

/// One of the supported remote backends
#[derive(Debug, Clone)]
pub enum Backend {
    #[cfg(feature = "sagemaker")]
    SageMaker(SageMakerBackend),
    TritonHttp(TritonHttpBackend),
    #[cfg(feature = "triton-grpc")]
    TritonGrpc(TritonGrpcBackend),
}

impl Backend {
    /// Construct the backend selected by `config.kind`
    ///
    /// # Errors
    /// - Invalid backend settings
    /// - The selected backend was not compiled in
    pub async fn from_config(config: &BackendConfig) -> Result<Self> {
        match config.kind {
            #[cfg(feature = "sagemaker")]
            BackendKind::SageMaker => Ok(Self::SageMaker(SageMakerBackend::from_config(config).await?)),
            #[cfg(not(feature = "sagemaker"))]
            BackendKind::SageMaker => Err(DispatchError::invalid_config(
                "sagemaker backend requires the 'sagemaker' feature",
            )),
            BackendKind::TritonHttp => Ok(Self::TritonHttp(TritonHttpBackend::from_config(config)?)),
            #[cfg(feature = "triton-grpc")]
            BackendKind::TritonGrpc => Ok(Self::TritonGrpc(TritonGrpcBackend::from_config(config)?)),
            #[cfg(not(feature = "triton-grpc"))]
            BackendKind::TritonGrpc => Err(DispatchError::invalid_config(
                "triton_grpc backend requires the 'triton-grpc' feature",
            )),
        }
    }

    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            #[cfg(feature = "sagemaker")]
            Self::SageMaker(_) => BackendKind::SageMaker,
            Self::TritonHttp(_) => BackendKind::TritonHttp,
            #[cfg(feature = "triton-grpc")]
            Self::TritonGrpc(_) => BackendKind::TritonGrpc,
        }
    }
}

#[async_trait]
impl InferenceBackend for Backend {
    async fn infer(&self, ctx: &InferenceContext, payload: &[u8]) -> Result<Vec<u8>> {
        match self {
            #[cfg(feature = "sagemaker")]
            Self::SageMaker(backend) => backend.infer(ctx, payload).await,
            Self::TritonHttp(backend) => backend.infer(ctx, payload).await,
            #[cfg(feature = "triton-grpc")]
            Self::TritonGrpc(backend) => backend.infer(ctx, payload).await,
        }
    }

    fn name(&self) -> &str {
        match self {
            #[cfg(feature = "sagemaker")]
            Self::SageMaker(backend) => backend.name(),
            Self::TritonHttp(backend) => backend.name(),
            #[cfg(feature = "triton-grpc")]
            Self::TritonGrpc(backend) => backend.name(),
        }
    }
}
