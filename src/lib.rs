//! kernel_dispatch: the device-dispatch boundary of an inference engine.
//!
//! The execution layer asks a [`KernelRegistry`] for the kernel that
//! implements an operation on the device its tensors live on, then launches
//! it. This crate owns that lookup and the kernels behind it.
//!
//! # Features
//!
//! - Three operations: RMSNorm, element-wise add, embedding lookup.
//! - One trait per operation ([`RmsNormKernel`], [`AddKernel`], [`EmbeddingKernel`]).
//! - An immutable registry built once, shared freely across threads.
//! - `rayon`-parallel CPU kernels, and `wgpu` compute shader kernels behind the
//!   `wgpu` feature.
//!
//! # Modules
//!
//! - [`device`]: Compute device tags.
//! - [`tensor`]: Device-tagged tensors and element types.
//! - [`stream`]: Opaque execution-queue tokens.
//! - [`kernels`]: Kernel contracts and the CPU/GPU implementations.
//! - [`registry`]: `(operation, device) -> kernel` lookup.
//! - [`config`]: Startup configuration.
//! - [`error`]: The crate's error type.
//!
//! # Example
//!
//! ```rust
//! use kernel_dispatch::{DataType, DeviceType, KernelConfig, KernelRegistry, StreamHandle, Tensor};
//!
//! let registry = KernelRegistry::from_config(&KernelConfig::cpu_only()).unwrap();
//! let embed = registry.resolve_embedding(DeviceType::Cpu).unwrap();
//!
//! let weight = Tensor::from_f32(vec![3, 2], vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0], DeviceType::Cpu);
//! let tokens = Tensor::from_i32(vec![3], vec![2, 0, 1], DeviceType::Cpu);
//! let mut out = Tensor::zeros(DataType::Fp32, vec![3, 2], DeviceType::Cpu);
//!
//! kernel_dispatch::kernels::validate_indices(&tokens, 3).unwrap();
//! embed.launch(&tokens, &weight, &mut out, 3, StreamHandle::NULL).unwrap();
//! assert_eq!(out.as_f32().unwrap(), &[2.0, 2.0, 0.0, 0.0, 1.0, 1.0]);
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod kernels;
pub mod registry;
pub mod stream;
pub mod tensor;

pub use config::{DEFAULT_EPS, GpuPreference, KernelConfig};
pub use device::DeviceType;
pub use error::{KernelError, KernelResult};
pub use kernels::{AddKernel, EmbeddingKernel, KernelEntry, OpKind, RmsNormKernel};
pub use registry::{KernelRegistry, KernelRegistryBuilder};
pub use stream::StreamHandle;
pub use tensor::{Buffer, DataType, Tensor};
