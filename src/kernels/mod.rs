//! # Kernel Contracts
//!
//! This module defines the fixed set of operations the engine can dispatch and
//! the interface every device-specific implementation satisfies.
//!
//! ## Submodules
//!
//! - [`cpu`]: `rayon`-parallel host kernels (always compiled)
//! - [`wgpu`] *(opt-in)*: GPU compute shader kernels using `wgpu`
//!
//! ## Kernel Shape
//!
//! Every kernel takes read-only input tensors, one mutable pre-allocated output
//! tensor, the operation's scalar parameters and a [`StreamHandle`]. It writes
//! the output in place and returns nothing else; `Err` reports a device failure
//! or a contract violation it detected before touching the output.
//!
//! ## Extending
//!
//! To add a device:
//!
//! 1. Add a [`DeviceType`] variant
//! 2. Implement the three traits in a new submodule
//! 3. Register the kernels in [`KernelRegistry::from_config`](crate::registry::KernelRegistry::from_config)
//!
//! ## Feature Flags
//!
//! - `wgpu`: Enables the [`wgpu`] kernels bound to [`DeviceType::Gpu`]

use crate::device::DeviceType;
use crate::error::{KernelError, KernelResult};
use crate::stream::StreamHandle;
use crate::tensor::{DataType, Tensor};
use core::fmt;
use std::sync::Arc;

pub mod cpu;

#[cfg(feature = "wgpu")]
pub mod wgpu;

/// Closed set of dispatchable operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    RmsNorm,
    Add,
    Embedding,
}

impl OpKind {
    /// Number of operations, used to size dispatch tables.
    pub const COUNT: usize = 3;

    /// Every operation, in index order.
    pub const ALL: [Self; Self::COUNT] = [Self::RmsNorm, Self::Add, Self::Embedding];

    /// Dense index of this operation in `0..COUNT`.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RmsNorm => "rmsnorm",
            Self::Add => "add",
            Self::Embedding => "embedding",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Root-mean-square normalization over the last axis.
///
/// For every row `x` of `input` (length `d`, the last dimension):
/// `output = x * weight * rsqrt(mean(x^2) + eps)`, where `weight` has shape `[d]`
/// and `eps` is a property of the kernel instance.
pub trait RmsNormKernel: Send + Sync {
    /// Implementation name, used in logs.
    fn name(&self) -> &str;

    /// Device this kernel runs on.
    fn device(&self) -> DeviceType;

    /// Normalizes `input` into `output`, which must already have `input`'s shape.
    ///
    /// # Errors
    ///
    /// Fails without writing `output` on device, dtype or shape mismatch, or
    /// if the device rejects the launch.
    fn launch(
        &self,
        input: &Tensor,
        weight: &Tensor,
        output: &mut Tensor,
        stream: StreamHandle,
    ) -> KernelResult<()>;
}

/// Element-wise addition of two equally shaped tensors. No broadcasting.
pub trait AddKernel: Send + Sync {
    fn name(&self) -> &str;

    fn device(&self) -> DeviceType;

    /// Writes `input1 + input2` into `output`.
    ///
    /// # Errors
    ///
    /// Fails without writing `output` unless all three tensors share one shape,
    /// one device (the kernel's) and the `Fp32` dtype.
    fn launch(
        &self,
        input1: &Tensor,
        input2: &Tensor,
        output: &mut Tensor,
        stream: StreamHandle,
    ) -> KernelResult<()>;
}

/// Row gather from a `[vocab_size, embedding_dim]` weight matrix.
///
/// Indices outside `[0, vocab_size)` are a caller bug. Check them with
/// [`validate_indices`] before launching; the kernels themselves do not
/// report them as errors.
pub trait EmbeddingKernel: Send + Sync {
    fn name(&self) -> &str;

    fn device(&self) -> DeviceType;

    /// Copies `weight[input[i]]` into row `i` of `output` (`[n, embedding_dim]`).
    ///
    /// # Errors
    ///
    /// Fails without writing `output` on device, dtype or shape mismatch, or
    /// if the device rejects the launch.
    fn launch(
        &self,
        input: &Tensor,
        weight: &Tensor,
        output: &mut Tensor,
        vocab_size: usize,
        stream: StreamHandle,
    ) -> KernelResult<()>;
}

/// A registered kernel, tagged with the operation it implements.
#[derive(Clone)]
pub enum KernelEntry {
    RmsNorm(Arc<dyn RmsNormKernel>),
    Add(Arc<dyn AddKernel>),
    Embedding(Arc<dyn EmbeddingKernel>),
}

impl KernelEntry {
    #[must_use]
    pub fn op(&self) -> OpKind {
        match self {
            Self::RmsNorm(_) => OpKind::RmsNorm,
            Self::Add(_) => OpKind::Add,
            Self::Embedding(_) => OpKind::Embedding,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::RmsNorm(k) => k.name(),
            Self::Add(k) => k.name(),
            Self::Embedding(k) => k.name(),
        }
    }

    #[must_use]
    pub fn device(&self) -> DeviceType {
        match self {
            Self::RmsNorm(k) => k.device(),
            Self::Add(k) => k.device(),
            Self::Embedding(k) => k.device(),
        }
    }
}

impl fmt::Debug for KernelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelEntry")
            .field("op", &self.op())
            .field("name", &self.name())
            .field("device", &self.device())
            .finish()
    }
}

/// Checks every named tensor lives on `expected`.
///
/// # Errors
///
/// [`KernelError::DeviceMismatch`] naming the first offending argument.
pub fn check_device(expected: DeviceType, args: &[(&'static str, &Tensor)]) -> KernelResult<()> {
    for &(arg, tensor) in args {
        if tensor.device() != expected {
            return Err(KernelError::DeviceMismatch {
                arg,
                expected,
                found: tensor.device(),
            });
        }
    }
    Ok(())
}

/// Checks a tensor has the expected element type.
///
/// # Errors
///
/// [`KernelError::DataTypeMismatch`].
pub fn check_dtype(arg: &'static str, tensor: &Tensor, expected: DataType) -> KernelResult<()> {
    if tensor.dtype() != expected {
        return Err(KernelError::DataTypeMismatch {
            arg,
            expected,
            found: tensor.dtype(),
        });
    }
    Ok(())
}

/// Checks a tensor has exactly the expected shape.
///
/// # Errors
///
/// [`KernelError::ShapeMismatch`].
pub fn check_shape(arg: &'static str, tensor: &Tensor, expected: &[usize]) -> KernelResult<()> {
    if tensor.shape() != expected {
        return Err(KernelError::ShapeMismatch {
            arg,
            expected: expected.to_vec(),
            found: tensor.shape().to_vec(),
        });
    }
    Ok(())
}

/// Float data of a tensor argument.
pub(crate) fn f32_data<'t>(arg: &'static str, tensor: &'t Tensor) -> KernelResult<&'t [f32]> {
    tensor.as_f32().ok_or(KernelError::DataTypeMismatch {
        arg,
        expected: DataType::Fp32,
        found: tensor.dtype(),
    })
}

/// Mutable float data of the output tensor.
pub(crate) fn f32_data_mut<'t>(
    arg: &'static str,
    tensor: &'t mut Tensor,
) -> KernelResult<&'t mut [f32]> {
    let found = tensor.dtype();
    tensor.as_f32_mut().ok_or(KernelError::DataTypeMismatch {
        arg,
        expected: DataType::Fp32,
        found,
    })
}

/// Integer data of a tensor argument.
pub(crate) fn i32_data<'t>(arg: &'static str, tensor: &'t Tensor) -> KernelResult<&'t [i32]> {
    tensor.as_i32().ok_or(KernelError::DataTypeMismatch {
        arg,
        expected: DataType::Int32,
        found: tensor.dtype(),
    })
}

/// Contract checks shared by every RMSNorm implementation.
pub(crate) fn check_rmsnorm(
    device: DeviceType,
    input: &Tensor,
    weight: &Tensor,
    output: &Tensor,
) -> KernelResult<()> {
    check_device(device, &[("input", input), ("weight", weight), ("output", output)])?;
    check_dtype("input", input, DataType::Fp32)?;
    check_dtype("weight", weight, DataType::Fp32)?;
    check_dtype("output", output, DataType::Fp32)?;
    check_shape("weight", weight, &[input.last_dim()])?;
    check_shape("output", output, input.shape())
}

/// Contract checks shared by every add implementation.
pub(crate) fn check_add(
    device: DeviceType,
    input1: &Tensor,
    input2: &Tensor,
    output: &Tensor,
) -> KernelResult<()> {
    check_device(device, &[("input1", input1), ("input2", input2), ("output", output)])?;
    check_dtype("input1", input1, DataType::Fp32)?;
    check_dtype("input2", input2, DataType::Fp32)?;
    check_dtype("output", output, DataType::Fp32)?;
    check_shape("input2", input2, input1.shape())?;
    check_shape("output", output, input1.shape())
}

/// Contract checks shared by every embedding implementation.
///
/// `weight` must be exactly `[vocab_size, dim]`. Returns `dim`.
pub(crate) fn check_embedding(
    device: DeviceType,
    input: &Tensor,
    weight: &Tensor,
    output: &Tensor,
    vocab_size: usize,
) -> KernelResult<usize> {
    check_device(device, &[("input", input), ("weight", weight), ("output", output)])?;
    check_dtype("input", input, DataType::Int32)?;
    check_dtype("weight", weight, DataType::Fp32)?;
    check_dtype("output", output, DataType::Fp32)?;
    let dim = weight.last_dim();
    check_shape("weight", weight, &[vocab_size, dim])?;
    check_shape("output", output, &[input.len(), dim])?;
    Ok(dim)
}

/// Caller-side precondition check for embedding lookups.
///
/// # Errors
///
/// [`KernelError::DataTypeMismatch`] if `input` is not `Int32`, and
/// [`KernelError::IndexOutOfRange`] for the first index outside `[0, vocab_size)`.
pub fn validate_indices(input: &Tensor, vocab_size: usize) -> KernelResult<()> {
    let Some(indices) = input.as_i32() else {
        return Err(KernelError::DataTypeMismatch {
            arg: "input",
            expected: DataType::Int32,
            found: input.dtype(),
        });
    };
    for (position, &index) in indices.iter().enumerate() {
        let in_range = usize::try_from(index).is_ok_and(|i| i < vocab_size);
        if !in_range {
            return Err(KernelError::IndexOutOfRange {
                index,
                position,
                vocab_size,
            });
        }
    }
    Ok(())
}
