//! Error type shared by the registry, the kernels and tensor construction.

use crate::device::DeviceType;
use crate::kernels::OpKind;
use crate::tensor::DataType;
use thiserror::Error;

#[cfg(feature = "wgpu")]
use crate::kernels::wgpu::GpuFailure;

/// Failures surfaced by kernel dispatch and launch.
///
/// Lookups never produce an error on their own (`resolve_*` return `None`);
/// [`KernelError::UnsupportedDevice`] exists for callers that prefer `?`.
#[derive(Debug, Error)]
pub enum KernelError {
    /// No kernel is bound for this operation on this device.
    #[error("no {op} kernel registered for device `{device}`")]
    UnsupportedDevice { op: OpKind, device: DeviceType },

    /// A tensor argument lives on a different device than the kernel.
    #[error("`{arg}` is on device `{found}` but the kernel runs on `{expected}`")]
    DeviceMismatch {
        arg: &'static str,
        expected: DeviceType,
        found: DeviceType,
    },

    /// Tensor shapes disagree with the operation's contract.
    #[error("`{arg}` has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        arg: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// A tensor argument has the wrong element type.
    #[error("`{arg}` has dtype {found:?}, expected {expected:?}")]
    DataTypeMismatch {
        arg: &'static str,
        expected: DataType,
        found: DataType,
    },

    /// An embedding index falls outside `[0, vocab_size)`.
    #[error("index {index} at position {position} is outside vocabulary of size {vocab_size}")]
    IndexOutOfRange {
        index: i32,
        position: usize,
        vocab_size: usize,
    },

    /// Buffer length disagrees with the shape it was given.
    #[error("shape {shape:?} is incompatible with {len} data elements")]
    InvalidTensor { shape: Vec<usize>, len: usize },

    #[error("invalid kernel configuration: {0}")]
    InvalidConfig(String),

    /// The GPU backend failed to initialise or to run a launch.
    #[cfg(feature = "wgpu")]
    #[error(transparent)]
    Gpu(#[from] GpuFailure),
}

/// Result alias used across the crate.
pub type KernelResult<T> = Result<T, KernelError>;
