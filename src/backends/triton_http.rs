//! Triton inference server backend over HTTP (KServe v2 protocol)
//!
//! Requests use the binary tensor extension: a JSON inference header
//! followed by the raw tensor bytes, with the header length announced in
//! `Inference-Header-Content-Length`. Responses that carry a binary section
//! yield the first output tensor's bytes; pure JSON responses are returned
//! as-is.

use super::run_with_context;
use crate::config::BackendConfig;
use crate::context::InferenceContext;
use crate::error::{DispatchError, Result};
use crate::inference::InferenceBackend;
use crate::utils::{decode_bytes_element, encode_bytes_element, shape_to_i64, TensorDataType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Header announcing the JSON header length in binary-extension bodies
pub const INFERENCE_HEADER_CONTENT_LENGTH: &str = "Inference-Header-Content-Length";

#[derive(Debug, Serialize)]
struct InferRequestHeader<'a> {
    inputs: Vec<InputTensorHeader<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<RequestedOutputHeader<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<RequestParameters>,
}

#[derive(Debug, Serialize)]
struct InputTensorHeader<'a> {
    name: &'a str,
    shape: &'a [i64],
    datatype: &'a str,
    parameters: BinaryDataSize,
}

#[derive(Debug, Serialize, Deserialize)]
struct BinaryDataSize {
    binary_data_size: usize,
}

#[derive(Debug, Serialize)]
struct RequestedOutputHeader<'a> {
    name: &'a str,
    parameters: BinaryDataOutput,
}

#[derive(Debug, Serialize)]
struct BinaryDataOutput {
    binary_data: bool,
}

#[derive(Debug, Serialize)]
struct RequestParameters {
    binary_data_output: bool,
}

#[derive(Debug, Deserialize)]
struct InferResponseHeader {
    #[serde(default)]
    outputs: Vec<OutputTensorHeader>,
}

#[derive(Debug, Deserialize)]
struct OutputTensorHeader {
    name: String,
    datatype: String,
    #[serde(default)]
    parameters: Option<BinaryDataSize>,
}

/// Backend posting binary inference requests to a Triton HTTP endpoint
#[derive(Debug, Clone)]
pub struct TritonHttpBackend {
    client: reqwest::Client,
    url: String,
    input_name: String,
    output_name: Option<String>,
    shape: Vec<i64>,
    datatype: TensorDataType,
}

impl TritonHttpBackend {
    /// Create a backend from connection and tensor settings
    ///
    /// `config.address` may be `host:port` or a full `http(s)://` base URL.
    ///
    /// # Errors
    /// - Invalid backend settings
    /// - The HTTP client cannot be built
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| DispatchError::internal(format!("failed to build HTTP client: {}", e)))?;

        let url = infer_url(&config.address, &config.model);
        debug!(url = %url, input = %config.input_name, "Triton HTTP backend configured");

        Ok(Self {
            client,
            url,
            input_name: config.input_name.clone(),
            output_name: config.output_name.clone(),
            shape: shape_to_i64(&config.shape)?,
            datatype: config.datatype,
        })
    }

    /// Inference URL this backend posts to
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build the request body and the JSON header length
    fn build_body(&self, payload: &[u8]) -> Result<(Vec<u8>, usize)> {
        let tensor = match self.datatype {
            TensorDataType::Bytes => encode_bytes_element(payload)?,
            _ => payload.to_vec(),
        };

        let outputs = self
            .output_name
            .as_deref()
            .map(|name| {
                vec![RequestedOutputHeader {
                    name,
                    parameters: BinaryDataOutput { binary_data: true },
                }]
            })
            .unwrap_or_default();
        let parameters = outputs.is_empty().then_some(RequestParameters {
            binary_data_output: true,
        });

        let header = InferRequestHeader {
            inputs: vec![InputTensorHeader {
                name: &self.input_name,
                shape: &self.shape,
                datatype: self.datatype.as_str(),
                parameters: BinaryDataSize {
                    binary_data_size: tensor.len(),
                },
            }],
            outputs,
            parameters,
        };

        let mut body = serde_json::to_vec(&header)
            .map_err(|e| DispatchError::internal(format!("failed to encode inference header: {}", e)))?;
        let header_len = body.len();
        body.extend_from_slice(&tensor);
        Ok((body, header_len))
    }
}

/// Build `{base}/v2/models/{model}/infer`, defaulting to plain HTTP
fn infer_url(address: &str, model: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        format!("{}/v2/models/{}/infer", address, model)
    } else {
        format!("http://{}/v2/models/{}/infer", address, model)
    }
}

/// Extract the first output tensor from a response body
///
/// With `header_len` the body is a JSON header followed by binary tensors;
/// without it the whole body is returned unchanged.
fn split_response(body: Vec<u8>, header_len: Option<usize>) -> Result<Vec<u8>> {
    let Some(header_len) = header_len else {
        return Ok(body);
    };
    let header_bytes = body.get(..header_len).ok_or_else(|| {
        DispatchError::backend(format!(
            "inference header length {} exceeds response size {}",
            header_len,
            body.len()
        ))
    })?;
    let header: InferResponseHeader = serde_json::from_slice(header_bytes)
        .map_err(|e| DispatchError::backend(format!("malformed inference header: {}", e)))?;
    let output = header
        .outputs
        .first()
        .ok_or_else(|| DispatchError::backend("no outputs from Triton"))?;

    let binary = body.get(header_len..).unwrap_or_default();
    let size = output
        .parameters
        .as_ref()
        .map_or(binary.len(), |p| p.binary_data_size);
    let data = binary.get(..size).ok_or_else(|| {
        DispatchError::backend(format!(
            "output '{}' declares {} bytes but response carries {}",
            output.name,
            size,
            binary.len()
        ))
    })?;

    if output.datatype.eq_ignore_ascii_case("BYTES") {
        Ok(decode_bytes_element(data)?.to_vec())
    } else {
        Ok(data.to_vec())
    }
}

#[async_trait]
impl InferenceBackend for TritonHttpBackend {
    async fn infer(&self, ctx: &InferenceContext, payload: &[u8]) -> Result<Vec<u8>> {
        let (body, header_len) = self.build_body(payload)?;
        trace!(url = %self.url, bytes = body.len(), "posting inference request");

        let call = async {
            let mut request = self
                .client
                .post(&self.url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .header(INFERENCE_HEADER_CONTENT_LENGTH, header_len)
                .body(body);
            if let Some(remaining) = ctx.remaining() {
                request = request.timeout(remaining);
            }

            let response = request
                .send()
                .await
                .map_err(|e| DispatchError::backend(format!("Triton HTTP request failed: {}", e)))?;

            let status = response.status();
            let response_header_len = response
                .headers()
                .get(INFERENCE_HEADER_CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            let bytes = response.bytes().await.map_err(|e| {
                DispatchError::backend(format!("failed to read Triton response: {}", e))
            })?;

            if !status.is_success() {
                return Err(DispatchError::backend(format!(
                    "Triton infer failed: {}: {}",
                    status,
                    String::from_utf8_lossy(&bytes)
                )));
            }
            split_response(bytes.to_vec(), response_header_len)
        };
        run_with_context(ctx, call).await
    }

    fn name(&self) -> &str {
        "triton_http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    fn config(datatype: TensorDataType, output_name: Option<&str>) -> BackendConfig {
        BackendConfig {
            kind: BackendKind::TritonHttp,
            address: "localhost:8000".to_string(),
            datatype,
            output_name: output_name.map(str::to_string),
            ..BackendConfig::default()
        }
    }

    #[test]
    fn test_infer_url() {
        assert_eq!(
            infer_url("localhost:8000", "u2net"),
            "http://localhost:8000/v2/models/u2net/infer"
        );
        assert_eq!(
            infer_url("https://triton.internal/", "u2net"),
            "https://triton.internal/v2/models/u2net/infer"
        );
    }

    #[test]
    fn test_request_body_layout() {
        let backend = TritonHttpBackend::from_config(&config(TensorDataType::Uint8, None)).unwrap();
        let (body, header_len) = backend.build_body(&[7, 8, 9]).unwrap();

        let header: serde_json::Value = serde_json::from_slice(&body[..header_len]).unwrap();
        assert_eq!(header["inputs"][0]["name"], "INPUT__0");
        assert_eq!(header["inputs"][0]["datatype"], "UINT8");
        assert_eq!(header["inputs"][0]["shape"], serde_json::json!([1, 3, 320, 320]));
        assert_eq!(header["inputs"][0]["parameters"]["binary_data_size"], 3);
        assert_eq!(header["parameters"]["binary_data_output"], true);
        assert!(header.get("outputs").is_none());
        assert_eq!(&body[header_len..], &[7, 8, 9]);
    }

    #[test]
    fn test_bytes_input_is_length_prefixed() {
        let backend =
            TritonHttpBackend::from_config(&config(TensorDataType::Bytes, Some("OUTPUT__0"))).unwrap();
        let (body, header_len) = backend.build_body(b"png").unwrap();

        let header: serde_json::Value = serde_json::from_slice(&body[..header_len]).unwrap();
        assert_eq!(header["inputs"][0]["parameters"]["binary_data_size"], 7);
        assert_eq!(header["outputs"][0]["name"], "OUTPUT__0");
        assert_eq!(header["outputs"][0]["parameters"]["binary_data"], true);
        assert_eq!(&body[header_len..], &[3, 0, 0, 0, b'p', b'n', b'g']);
    }

    #[test]
    fn test_split_binary_response() {
        let header = br#"{"model_name":"u2net","outputs":[{"name":"OUT","datatype":"UINT8","shape":[4],"parameters":{"binary_data_size":4}}]}"#;
        let mut body = header.to_vec();
        body.extend_from_slice(&[1, 2, 3, 4]);

        let out = split_response(body, Some(header.len())).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_split_bytes_response_strips_prefix() {
        let header = br#"{"outputs":[{"name":"OUT","datatype":"BYTES","shape":[1],"parameters":{"binary_data_size":6}}]}"#;
        let mut body = header.to_vec();
        body.extend_from_slice(&[2, 0, 0, 0, 0xAB, 0xCD]);

        let out = split_response(body, Some(header.len())).unwrap();
        assert_eq!(out, vec![0xAB, 0xCD]);
    }

    #[test]
    fn test_json_response_returned_verbatim() {
        let body = br#"{"outputs":[{"name":"OUT","data":[1,2]}]}"#.to_vec();
        assert_eq!(split_response(body.clone(), None).unwrap(), body);
    }

    #[test]
    fn test_truncated_response_is_rejected() {
        let header = br#"{"outputs":[{"name":"OUT","datatype":"UINT8","parameters":{"binary_data_size":10}}]}"#;
        let mut body = header.to_vec();
        body.extend_from_slice(&[1, 2]);

        assert!(split_response(body.clone(), Some(header.len())).is_err());
        assert!(split_response(body, Some(10_000)).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_backend_error() {
        let mut cfg = config(TensorDataType::Uint8, None);
        cfg.address = "127.0.0.1:1".to_string();
        let backend = TritonHttpBackend::from_config(&cfg).unwrap();

        let ctx = InferenceContext::with_timeout(std::time::Duration::from_secs(5));
        let err = backend.infer(&ctx, b"image").await.unwrap_err();
        assert!(matches!(err, DispatchError::Backend(_)));
    }
}
