// Minimal host-side tensor value.
//
// The channel only ever needs four things from a tensor: where it lives
// (device), how many dimensions it has, its element type and a flat,
// contiguous view of the data in row-major order. Anything richer belongs
// to the numeric library on either side of the channel.

use std::fmt;

/// Where a tensor's storage lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    /// Accelerator memory, by ordinal. Not addressable from the host.
    Cuda(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    Int32,
    Float32,
    Int64,
    Float64,
}

impl DType {
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::Int32 | DType::Float32 => 4,
            DType::Int64 | DType::Float64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::Int32 => "int32",
            DType::Float32 => "float32",
            DType::Int64 => "int64",
            DType::Float64 => "float64",
        };
        f.write_str(s)
    }
}

/// Flat element storage, one variant per dtype.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    Int32(Vec<i32>),
    Float32(Vec<f32>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Int32(_) => DType::Int32,
            TensorData::Float32(_) => DType::Float32,
            TensorData::Int64(_) => DType::Int64,
            TensorData::Float64(_) => DType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Int32(v) => v.len(),
            TensorData::Float32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
            TensorData::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TensorError {
    #[error("shape {shape:?} holds {expected} elements but data has {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    data: TensorData,
    shape: Vec<usize>,
    device: Device,
}

impl Tensor {
    /// Build a tensor from flat data and a shape. The product of `shape` must
    /// equal the number of elements.
    pub fn new(data: TensorData, shape: Vec<usize>, device: Device) -> Result<Self, TensorError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(TensorError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            shape,
            device,
        })
    }

    /// 1-D host tensor over `data`.
    pub fn from_data(data: TensorData) -> Self {
        let shape = vec![data.len()];
        Self {
            data,
            shape,
            device: Device::Cpu,
        }
    }

    pub fn from_i32(values: Vec<i32>) -> Self {
        Self::from_data(TensorData::Int32(values))
    }

    pub fn from_f32(values: Vec<f32>) -> Self {
        Self::from_data(TensorData::Float32(values))
    }

    /// Relabel the storage location. Data is kept as-is; this only models
    /// what the channel sees when handed a device tensor.
    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    #[inline]
    pub fn is_host(&self) -> bool {
        self.device == Device::Cpu
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn into_data(self) -> TensorData {
        self.data
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.data {
            TensorData::Int32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::Float32(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_i32_is_one_dimensional_host() {
        let t = Tensor::from_i32(vec![1, 2, 3]);
        assert_eq!(t.shape(), &[3]);
        assert_eq!(t.ndim(), 1);
        assert!(t.is_host());
        assert_eq!(t.dtype(), DType::Int32);
        assert_eq!(t.as_i32(), Some(&[1, 2, 3][..]));
        assert_eq!(t.as_f32(), None);
    }

    #[test]
    fn empty_tensor_keeps_one_dimension() {
        let t = Tensor::from_f32(Vec::new());
        assert_eq!(t.shape(), &[0]);
        assert!(t.is_empty());
    }

    #[test]
    fn shape_must_match_data() {
        let err = Tensor::new(TensorData::Float32(vec![0.0; 5]), vec![2, 3], Device::Cpu)
            .unwrap_err();
        assert_eq!(
            err,
            TensorError::ShapeMismatch {
                shape: vec![2, 3],
                expected: 6,
                actual: 5
            }
        );

        let t = Tensor::new(TensorData::Float32(vec![0.0; 6]), vec![2, 3], Device::Cpu).unwrap();
        assert_eq!(t.ndim(), 2);
    }

    #[test]
    fn to_device_changes_location_only() {
        let t = Tensor::from_i32(vec![4]).to_device(Device::Cuda(0));
        assert!(!t.is_host());
        assert_eq!(t.device().to_string(), "cuda:0");
        assert_eq!(t.as_i32(), Some(&[4][..]));
    }

    #[test]
    fn dtype_sizes() {
        assert_eq!(DType::Int32.size_bytes(), 4);
        assert_eq!(DType::Float64.size_bytes(), 8);
        assert_eq!(DType::Float32.to_string(), "float32");
    }
}
