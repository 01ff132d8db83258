//! Device-tagged tensors consumed by the kernels.
//!
//! # Tensor Model
//!
//! A [`Tensor`] is a row-major buffer with a shape, an element type and the
//! [`DeviceType`] it belongs to. The tag decides which kernel variant the
//! registry hands out; kernels refuse tensors tagged with another device.
//!
//! ## Design Highlights
//! - Shape is a `Vec<usize>`; `len() == product(shape)` is enforced at construction
//! - Buffers are host-mirrored: GPU kernels upload and read back per launch
//! - Kernels borrow tensors (`&Tensor` inputs, `&mut Tensor` output), never own them
//!
//! ## Limitations
//! - Row-major only, no strides or views
//! - No broadcasting
//!
//! ## Example
//!
//! ```rust
//! use kernel_dispatch::{DeviceType, Tensor};
//! let t = Tensor::from_f32(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], DeviceType::Cpu);
//! assert_eq!(t.shape(), &[2, 3]);
//! assert_eq!(t.rows(), 2);
//! ```

use crate::device::DeviceType;
use crate::error::{KernelError, KernelResult};
use briny::prelude::{Validate, ValidationError};

/// Element type of a tensor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit IEEE float.
    Fp32,
    /// 32-bit signed integer (embedding indices).
    Int32,
    /// 8-bit signed integer.
    Int8,
}

impl DataType {
    /// Size of one element in bytes.
    #[must_use]
    pub const fn size_of(self) -> usize {
        match self {
            Self::Fp32 | Self::Int32 => 4,
            Self::Int8 => 1,
        }
    }
}

/// Typed storage backing a [`Tensor`].
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    F32(Vec<f32>),
    I32(Vec<i32>),
    I8(Vec<i8>),
}

impl Buffer {
    /// Zero-filled buffer of `len` elements.
    #[must_use]
    pub fn zeros(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::Fp32 => Self::F32(vec![0.0; len]),
            DataType::Int32 => Self::I32(vec![0; len]),
            DataType::Int8 => Self::I8(vec![0; len]),
        }
    }

    #[must_use]
    pub const fn dtype(&self) -> DataType {
        match self {
            Self::F32(_) => DataType::Fp32,
            Self::I32(_) => DataType::Int32,
            Self::I8(_) => DataType::Int8,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I8(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Represents an N-dimensional tensor placed on a compute device.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    device: DeviceType,
    buffer: Buffer,
}

impl Validate for Tensor {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.shape.iter().product::<usize>() != self.buffer.len() {
            return Err(ValidationError);
        }
        Ok(())
    }
}

impl Tensor {
    /// Creates a tensor, checking that the buffer fills the shape exactly.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidTensor`] if the number of elements in
    /// `buffer` does not match the shape product.
    pub fn try_new(
        shape: impl Into<Vec<usize>>,
        buffer: Buffer,
        device: DeviceType,
    ) -> KernelResult<Self> {
        let tensor = Self {
            shape: shape.into(),
            device,
            buffer,
        };
        tensor
            .validate()
            .map_err(|_| KernelError::InvalidTensor {
                shape: tensor.shape.clone(),
                len: tensor.buffer.len(),
            })?;
        Ok(tensor)
    }

    /// Creates a tensor with the given shape and buffer.
    ///
    /// # Panics
    /// Panics if the number of elements in `buffer` does not match the shape product.
    #[must_use]
    pub fn new(shape: impl Into<Vec<usize>>, buffer: Buffer, device: DeviceType) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            buffer.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            buffer.len()
        );
        Self {
            shape,
            device,
            buffer,
        }
    }

    /// Zero-filled tensor, the usual way to pre-size a kernel output.
    #[must_use]
    pub fn zeros(dtype: DataType, shape: impl Into<Vec<usize>>, device: DeviceType) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self {
            shape,
            device,
            buffer: Buffer::zeros(dtype, len),
        }
    }

    /// Float tensor from row-major data.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the shape product.
    #[must_use]
    pub fn from_f32(shape: impl Into<Vec<usize>>, data: Vec<f32>, device: DeviceType) -> Self {
        Self::new(shape, Buffer::F32(data), device)
    }

    /// Integer tensor from row-major data.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the shape product.
    #[must_use]
    pub fn from_i32(shape: impl Into<Vec<usize>>, data: Vec<i32>, device: DeviceType) -> Self {
        Self::new(shape, Buffer::I32(data), device)
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    #[must_use]
    pub const fn device(&self) -> DeviceType {
        self.device
    }

    #[must_use]
    pub const fn dtype(&self) -> DataType {
        self.buffer.dtype()
    }

    #[must_use]
    pub const fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Size of the buffer in bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.len() * self.dtype().size_of()
    }

    /// Length of the innermost axis (1 for a scalar).
    #[must_use]
    pub fn last_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    /// Number of rows along the innermost axis.
    #[must_use]
    pub fn rows(&self) -> usize {
        match self.last_dim() {
            0 => 0,
            dim => self.len() / dim,
        }
    }

    /// Float view of the buffer, `None` for other dtypes.
    #[must_use]
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.buffer {
            Buffer::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable float view of the buffer, `None` for other dtypes.
    #[must_use]
    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.buffer {
            Buffer::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Integer view of the buffer, `None` for other dtypes.
    #[must_use]
    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.buffer {
            Buffer::I32(v) => Some(v),
            _ => None,
        }
    }

    /// Moves the tensor to another device.
    ///
    /// Buffers are host-mirrored, so this only changes which kernels accept
    /// the tensor; the data is carried over unchanged.
    #[must_use]
    pub fn to_device(mut self, device: DeviceType) -> Self {
        self.device = device;
        self
    }
}
