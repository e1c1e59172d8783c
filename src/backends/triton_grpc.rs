//! Triton inference server backend over gRPC
//!
//! Calls `inference.GRPCInferenceService/ModelInfer` with the payload in
//! `raw_input_contents` and returns the first entry of
//! `raw_output_contents`. The channel connects lazily on first use and is
//! shared by every call.

use super::run_with_context;
use crate::config::BackendConfig;
use crate::context::InferenceContext;
use crate::error::{DispatchError, Result};
use crate::inference::InferenceBackend;
use crate::utils::{decode_bytes_element, encode_bytes_element, shape_to_i64, TensorDataType};
use async_trait::async_trait;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, trace};

const MODEL_INFER_PATH: &str = "/inference.GRPCInferenceService/ModelInfer";

/// Subset of Triton's `grpc_service.proto` needed for `ModelInfer`
pub mod proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InferInputTensor {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, tag = "2")]
        pub datatype: String,
        #[prost(int64, repeated, tag = "3")]
        pub shape: Vec<i64>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InferRequestedOutputTensor {
        #[prost(string, tag = "1")]
        pub name: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ModelInferRequest {
        #[prost(string, tag = "1")]
        pub model_name: String,
        #[prost(string, tag = "2")]
        pub model_version: String,
        #[prost(string, tag = "3")]
        pub id: String,
        #[prost(message, repeated, tag = "5")]
        pub inputs: Vec<InferInputTensor>,
        #[prost(message, repeated, tag = "6")]
        pub outputs: Vec<InferRequestedOutputTensor>,
        #[prost(bytes = "vec", repeated, tag = "7")]
        pub raw_input_contents: Vec<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InferOutputTensor {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, tag = "2")]
        pub datatype: String,
        #[prost(int64, repeated, tag = "3")]
        pub shape: Vec<i64>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ModelInferResponse {
        #[prost(string, tag = "1")]
        pub model_name: String,
        #[prost(string, tag = "2")]
        pub model_version: String,
        #[prost(string, tag = "3")]
        pub id: String,
        #[prost(message, repeated, tag = "5")]
        pub outputs: Vec<InferOutputTensor>,
        #[prost(bytes = "vec", repeated, tag = "6")]
        pub raw_output_contents: Vec<Vec<u8>>,
    }
}

/// Backend issuing unary `ModelInfer` calls to a Triton gRPC endpoint
#[derive(Debug, Clone)]
pub struct TritonGrpcBackend {
    channel: Channel,
    model: String,
    input_name: String,
    output_name: Option<String>,
    shape: Vec<i64>,
    datatype: TensorDataType,
}

impl TritonGrpcBackend {
    /// Create a backend with a lazily connected channel
    ///
    /// `config.address` may be `host:port` or a full `http(s)://` URI.
    ///
    /// # Errors
    /// - Invalid backend settings or address
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        config.validate()?;
        let uri = endpoint_uri(&config.address);
        let channel = Endpoint::from_shared(uri.clone())
            .map_err(|e| {
                DispatchError::invalid_config(format!("invalid Triton gRPC address '{}': {}", uri, e))
            })?
            .connect_lazy();
        debug!(uri = %uri, model = %config.model, "Triton gRPC backend configured");

        Ok(Self {
            channel,
            model: config.model.clone(),
            input_name: config.input_name.clone(),
            output_name: config.output_name.clone(),
            shape: shape_to_i64(&config.shape)?,
            datatype: config.datatype,
        })
    }

    fn build_request(&self, payload: &[u8]) -> Result<proto::ModelInferRequest> {
        let raw = match self.datatype {
            TensorDataType::Bytes => encode_bytes_element(payload)?,
            _ => payload.to_vec(),
        };
        Ok(proto::ModelInferRequest {
            model_name: self.model.clone(),
            inputs: vec![proto::InferInputTensor {
                name: self.input_name.clone(),
                datatype: self.datatype.as_str().to_string(),
                shape: self.shape.clone(),
            }],
            outputs: self
                .output_name
                .iter()
                .map(|name| proto::InferRequestedOutputTensor { name: name.clone() })
                .collect(),
            raw_input_contents: vec![raw],
            ..Default::default()
        })
    }
}

fn endpoint_uri(address: &str) -> String {
    let address = address.trim();
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

/// Take the first raw output, stripping the length prefix of BYTES tensors
fn first_output(response: proto::ModelInferResponse) -> Result<Vec<u8>> {
    let is_bytes = response
        .outputs
        .first()
        .is_some_and(|o| o.datatype.eq_ignore_ascii_case("BYTES"));
    let raw = response
        .raw_output_contents
        .into_iter()
        .next()
        .ok_or_else(|| DispatchError::backend("no outputs from Triton"))?;
    if is_bytes {
        Ok(decode_bytes_element(&raw)?.to_vec())
    } else {
        Ok(raw)
    }
}

#[async_trait]
impl InferenceBackend for TritonGrpcBackend {
    async fn infer(&self, ctx: &InferenceContext, payload: &[u8]) -> Result<Vec<u8>> {
        let message = self.build_request(payload)?;
        trace!(model = %self.model, bytes = payload.len(), "sending ModelInfer");

        let call = async {
            let mut client = tonic::client::Grpc::new(self.channel.clone());
            client.ready().await.map_err(|e| {
                DispatchError::backend(format!("Triton gRPC channel not ready: {}", e))
            })?;

            let mut request = tonic::Request::new(message);
            if let Some(remaining) = ctx.remaining() {
                request.set_timeout(remaining);
            }
            let response: tonic::Response<proto::ModelInferResponse> = client
                .unary(
                    request,
                    PathAndQuery::from_static(MODEL_INFER_PATH),
                    ProstCodec::default(),
                )
                .await
                .map_err(|status| {
                    DispatchError::backend(format!("Triton gRPC infer failed: {}", status))
                })?;
            first_output(response.into_inner())
        };
        run_with_context(ctx, call).await
    }

    fn name(&self) -> &str {
        "triton_grpc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use prost::Message;

    fn config() -> BackendConfig {
        BackendConfig {
            kind: BackendKind::TritonGrpc,
            address: "localhost:8001".to_string(),
            ..BackendConfig::default()
        }
    }

    #[test]
    fn test_endpoint_uri() {
        assert_eq!(endpoint_uri("triton:8001"), "http://triton:8001");
        assert_eq!(endpoint_uri("https://triton:8001"), "https://triton:8001");
    }

    #[tokio::test]
    async fn test_request_carries_raw_payload() {
        let backend = TritonGrpcBackend::from_config(&config()).unwrap();
        let request = backend.build_request(&[1, 2, 3]).unwrap();

        assert_eq!(request.model_name, "u2net");
        assert_eq!(request.inputs[0].name, "INPUT__0");
        assert_eq!(request.inputs[0].datatype, "UINT8");
        assert_eq!(request.inputs[0].shape, vec![1, 3, 320, 320]);
        assert!(request.outputs.is_empty());
        assert_eq!(request.raw_input_contents, vec![vec![1, 2, 3]]);

        let decoded = proto::ModelInferRequest::decode(request.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, request);
    }

    #[tokio::test]
    async fn test_bytes_request_and_named_output() {
        let mut cfg = config();
        cfg.datatype = TensorDataType::Bytes;
        cfg.output_name = Some("OUTPUT__0".to_string());
        let backend = TritonGrpcBackend::from_config(&cfg).unwrap();

        let request = backend.build_request(b"ab").unwrap();
        assert_eq!(request.outputs[0].name, "OUTPUT__0");
        assert_eq!(request.raw_input_contents[0], vec![2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn test_first_output_extraction() {
        let response = proto::ModelInferResponse {
            outputs: vec![proto::InferOutputTensor {
                name: "OUT".to_string(),
                datatype: "UINT8".to_string(),
                shape: vec![2],
            }],
            raw_output_contents: vec![vec![9, 9], vec![1]],
            ..Default::default()
        };
        assert_eq!(first_output(response).unwrap(), vec![9, 9]);

        let bytes_response = proto::ModelInferResponse {
            outputs: vec![proto::InferOutputTensor {
                name: "OUT".to_string(),
                datatype: "BYTES".to_string(),
                shape: vec![1],
            }],
            raw_output_contents: vec![vec![1, 0, 0, 0, 42]],
            ..Default::default()
        };
        assert_eq!(first_output(bytes_response).unwrap(), vec![42]);

        assert!(first_output(proto::ModelInferResponse::default()).is_err());
    }

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let mut cfg = config();
        cfg.address = "not a uri".to_string();
        assert!(TritonGrpcBackend::from_config(&cfg).is_err());
    }

    #[tokio::test]
    async fn test_expired_context_skips_call() {
        let backend = TritonGrpcBackend::from_config(&config()).unwrap();
        let ctx = InferenceContext::background();
        ctx.cancel();
        assert!(backend.infer(&ctx, b"x").await.unwrap_err().is_cancellation());
    }
}
