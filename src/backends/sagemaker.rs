//! AWS SageMaker real-time endpoint backend
//!
//! Sends the payload as the request body of `InvokeEndpoint` and returns the
//! response body unchanged. Credentials and region come from the default AWS
//! provider chain unless a region is configured explicitly.

use super::run_with_context;
use crate::config::BackendConfig;
use crate::context::InferenceContext;
use crate::error::{DispatchError, Result};
use crate::inference::InferenceBackend;
use async_trait::async_trait;
use aws_sdk_sagemakerruntime::error::DisplayErrorContext;
use aws_sdk_sagemakerruntime::primitives::Blob;
use aws_sdk_sagemakerruntime::Client;
use tracing::debug;

/// Backend invoking a SageMaker endpoint
#[derive(Debug, Clone)]
pub struct SageMakerBackend {
    client: Client,
    endpoint: String,
    content_type: String,
}

impl SageMakerBackend {
    /// Load AWS configuration and create a client for `config.address`
    ///
    /// # Errors
    /// - The endpoint name is empty
    pub async fn from_config(config: &BackendConfig) -> Result<Self> {
        config.validate()?;

        let loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        let loader = match &config.region {
            Some(region) => loader.region(aws_config::Region::new(region.clone())),
            None => loader,
        };
        let sdk_config = loader.load().await;
        debug!(
            endpoint = %config.address,
            region = ?sdk_config.region(),
            "SageMaker client configured"
        );

        Ok(Self::with_client(
            Client::new(&sdk_config),
            config.address.clone(),
            config.content_type.clone(),
        ))
    }

    /// Use an existing SDK client
    #[must_use]
    pub fn with_client(client: Client, endpoint: String, content_type: String) -> Self {
        Self {
            client,
            endpoint,
            content_type,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl InferenceBackend for SageMakerBackend {
    async fn infer(&self, ctx: &InferenceContext, payload: &[u8]) -> Result<Vec<u8>> {
        let call = async {
            let response = self
                .client
                .invoke_endpoint()
                .endpoint_name(&self.endpoint)
                .content_type(&self.content_type)
                .body(Blob::new(payload.to_vec()))
                .send()
                .await
                .map_err(|e| {
                    DispatchError::backend(format!(
                        "SageMaker endpoint '{}' invocation failed: {}",
                        self.endpoint,
                        DisplayErrorContext(&e)
                    ))
                })?;

            response
                .body()
                .map(|body| body.as_ref().to_vec())
                .ok_or_else(|| {
                    DispatchError::backend(format!(
                        "SageMaker endpoint '{}' returned no body",
                        self.endpoint
                    ))
                })
        };
        run_with_context(ctx, call).await
    }

    fn name(&self) -> &str {
        "sagemaker"
    }
}
