#![forbid(unsafe_code)]

pub mod tensor;
pub use tensor::{DType, Device, Tensor, TensorData, TensorError};
