//! Shared helpers used by the backends and pipelines

pub mod tensor;

pub use tensor::{
    decode_bytes_element, encode_bytes_element, f32s_to_le_bytes,
    le_bytes_to_f32s, shape_to_i64, TensorDataType,
};
