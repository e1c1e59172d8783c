//! Tensor encoding helpers for the Triton backends
//!
//! Triton's binary tensor extension and gRPC `raw_input_contents` both carry
//! tensors as flat little-endian byte buffers. These helpers convert between
//! those buffers and Rust values, plus shape/datatype metadata.

use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};

/// Tensor element types understood by the Triton backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TensorDataType {
    Uint8,
    Int32,
    Int64,
    Fp32,
    /// Variable-length byte strings, each prefixed with a u32 LE length
    Bytes,
}

impl TensorDataType {
    /// Wire name used in Triton requests
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uint8 => "UINT8",
            Self::Int32 => "INT32",
            Self::Int64 => "INT64",
            Self::Fp32 => "FP32",
            Self::Bytes => "BYTES",
        }
    }
}

impl Default for TensorDataType {
    fn default() -> Self {
        Self::Uint8
    }
}

impl std::fmt::Display for TensorDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TensorDataType {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "UINT8" => Ok(Self::Uint8),
            "INT32" => Ok(Self::Int32),
            "INT64" => Ok(Self::Int64),
            "FP32" => Ok(Self::Fp32),
            "BYTES" => Ok(Self::Bytes),
            other => Err(DispatchError::invalid_config(format!(
                "unsupported tensor datatype '{}'. Valid options: UINT8, INT32, INT64, FP32, BYTES",
                other
            ))),
        }
    }
}

/// Encode f32 values as consecutive little-endian bytes
#[must_use]
pub fn f32s_to_le_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian bytes into f32 values
///
/// # Errors
/// - The buffer length is not a multiple of 4
pub fn le_bytes_to_f32s(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(DispatchError::backend(format!(
            "FP32 buffer length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Convert a shape to the i64 dimensions Triton expects
///
/// # Errors
/// - A dimension does not fit in an i64
pub fn shape_to_i64(shape: &[usize]) -> Result<Vec<i64>> {
    shape
        .iter()
        .map(|&dim| {
            i64::try_from(dim).map_err(|_| {
                DispatchError::invalid_config(format!("tensor dimension {} exceeds i64", dim))
            })
        })
        .collect()
}

/// Serialize one BYTES element: u32 LE length followed by the data
///
/// # Errors
/// - The element is longer than `u32::MAX` bytes
pub fn encode_bytes_element(data: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(data.len()).map_err(|_| {
        DispatchError::invalid_config(format!("BYTES element of {} bytes is too large", data.len()))
    })?;
    let mut out = Vec::with_capacity(4 + data.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    Ok(out)
}

/// Strip the u32 LE length prefix from the first BYTES element in `raw`
///
/// # Errors
/// - The buffer is shorter than its declared length
pub fn decode_bytes_element(raw: &[u8]) -> Result<&[u8]> {
    let header: [u8; 4] = raw
        .get(..4)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| DispatchError::backend("BYTES output shorter than its length prefix"))?;
    let len = u32::from_le_bytes(header) as usize;
    raw.get(4..4 + len).ok_or_else(|| {
        DispatchError::backend(format!(
            "BYTES output declares {} bytes but carries {}",
            len,
            raw.len().saturating_sub(4)
        ))
    })
}
