//! Kernel Registry
//!
//! Maps every `(OpKind, DeviceType)` pair to at most one kernel.
//!
//! The table is filled once through [`KernelRegistryBuilder`] and is read-only
//! afterwards, so a [`KernelRegistry`] can be shared between threads by
//! reference or behind an `Arc` without locking.
//!
//! # Lookup
//! - Direct array index, no scanning
//! - No cross-device fallback: a CPU tensor never reaches a GPU kernel
//! - Unbound pairs (always including [`DeviceType::Unknown`]) resolve to `None`
//!
//! # Example
//! ```rust
//! use kernel_dispatch::{DataType, DeviceType, KernelRegistry, StreamHandle, Tensor};
//!
//! let registry = KernelRegistry::cpu();
//! let add = registry.resolve_add(DeviceType::Cpu).expect("cpu add is bound");
//!
//! let a = Tensor::from_f32(vec![3], vec![1.0, 2.0, 3.0], DeviceType::Cpu);
//! let b = Tensor::from_f32(vec![3], vec![4.0, 5.0, 6.0], DeviceType::Cpu);
//! let mut out = Tensor::zeros(DataType::Fp32, vec![3], DeviceType::Cpu);
//! add.launch(&a, &b, &mut out, StreamHandle::NULL).unwrap();
//! assert_eq!(out.as_f32().unwrap(), &[5.0, 7.0, 9.0]);
//!
//! assert!(registry.resolve_add(DeviceType::Unknown).is_none());
//! ```

use crate::config::KernelConfig;
use crate::device::DeviceType;
use crate::error::{KernelError, KernelResult};
use crate::kernels::cpu::{CpuAdd, CpuEmbedding, CpuRmsNorm};
use crate::kernels::{AddKernel, EmbeddingKernel, KernelEntry, OpKind, RmsNormKernel};
use std::sync::Arc;

type Table = [[Option<KernelEntry>; DeviceType::COUNT]; OpKind::COUNT];

/// Immutable `(operation, device) -> kernel` table.
#[derive(Debug, Clone, Default)]
pub struct KernelRegistry {
    table: Table,
}

impl KernelRegistry {
    /// Starts an empty registry.
    #[must_use]
    pub fn builder() -> KernelRegistryBuilder {
        KernelRegistryBuilder::default()
    }

    /// Registry with the CPU kernels bound and default settings.
    #[must_use]
    pub fn cpu() -> Self {
        Self::builder().with_cpu_kernels(&KernelConfig::cpu_only()).build()
    }

    /// Registry described by `config`.
    ///
    /// CPU kernels are always bound. GPU kernels are bound when the `wgpu`
    /// feature is enabled, `config.gpu` is set and a device can be acquired;
    /// a failed acquisition is logged and leaves the GPU unbound.
    ///
    /// # Errors
    ///
    /// [`KernelError::InvalidConfig`] if `config` does not validate.
    pub fn from_config(config: &KernelConfig) -> KernelResult<Self> {
        config.check()?;
        let builder = Self::builder().with_cpu_kernels(config);

        #[cfg(feature = "wgpu")]
        let builder = if config.gpu {
            builder.with_gpu_kernels(config)
        } else {
            builder
        };

        if config.gpu && !cfg!(feature = "wgpu") {
            tracing::debug!("built without the `wgpu` feature; GPU kernels unavailable");
        }

        Ok(builder.build())
    }

    /// Untyped lookup.
    #[must_use]
    pub fn resolve(&self, op: OpKind, device: DeviceType) -> Option<&KernelEntry> {
        self.table[op.index()][device.index()].as_ref()
    }

    /// Like [`resolve`](Self::resolve), but an unbound pair is an error.
    ///
    /// # Errors
    ///
    /// [`KernelError::UnsupportedDevice`] when nothing is registered.
    pub fn require(&self, op: OpKind, device: DeviceType) -> KernelResult<&KernelEntry> {
        self.resolve(op, device)
            .ok_or(KernelError::UnsupportedDevice { op, device })
    }

    /// RMSNorm kernel for `device`, if one is bound.
    #[must_use]
    pub fn resolve_rmsnorm(&self, device: DeviceType) -> Option<&dyn RmsNormKernel> {
        match self.resolve(OpKind::RmsNorm, device)? {
            KernelEntry::RmsNorm(kernel) => Some(kernel.as_ref()),
            _ => None,
        }
    }

    /// Add kernel for `device`, if one is bound.
    #[must_use]
    pub fn resolve_add(&self, device: DeviceType) -> Option<&dyn AddKernel> {
        match self.resolve(OpKind::Add, device)? {
            KernelEntry::Add(kernel) => Some(kernel.as_ref()),
            _ => None,
        }
    }

    /// Embedding kernel for `device`, if one is bound.
    #[must_use]
    pub fn resolve_embedding(&self, device: DeviceType) -> Option<&dyn EmbeddingKernel> {
        match self.resolve(OpKind::Embedding, device)? {
            KernelEntry::Embedding(kernel) => Some(kernel.as_ref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_supported(&self, op: OpKind, device: DeviceType) -> bool {
        self.resolve(op, device).is_some()
    }

    /// Every bound `(op, device, kernel name)`, in table order.
    pub fn bindings(&self) -> impl Iterator<Item = (OpKind, DeviceType, &str)> + '_ {
        OpKind::ALL.into_iter().flat_map(move |op| {
            DeviceType::ALL.into_iter().filter_map(move |device| {
                self.resolve(op, device)
                    .map(|entry| (op, device, entry.name()))
            })
        })
    }

    /// Number of bound pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.iter().flatten().flatten().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Collects kernel bindings before freezing them into a [`KernelRegistry`].
///
/// Each kernel is filed under its trait's operation and its own
/// [`device`](RmsNormKernel::device). Registering a second kernel for the same
/// pair replaces the first. Kernels reporting [`DeviceType::Unknown`] are
/// dropped with a warning.
#[derive(Debug, Default)]
pub struct KernelRegistryBuilder {
    table: Table,
}

impl KernelRegistryBuilder {
    #[must_use]
    pub fn register_rmsnorm(self, kernel: impl RmsNormKernel + 'static) -> Self {
        self.insert(KernelEntry::RmsNorm(Arc::new(kernel)))
    }

    #[must_use]
    pub fn register_add(self, kernel: impl AddKernel + 'static) -> Self {
        self.insert(KernelEntry::Add(Arc::new(kernel)))
    }

    #[must_use]
    pub fn register_embedding(self, kernel: impl EmbeddingKernel + 'static) -> Self {
        self.insert(KernelEntry::Embedding(Arc::new(kernel)))
    }

    /// Files an already type-erased kernel under its own op and device.
    #[must_use]
    pub fn register(self, entry: KernelEntry) -> Self {
        self.insert(entry)
    }

    /// Binds the three CPU kernels.
    #[must_use]
    pub fn with_cpu_kernels(self, config: &KernelConfig) -> Self {
        self.register_rmsnorm(CpuRmsNorm::new(config.eps))
            .register_add(CpuAdd)
            .register_embedding(CpuEmbedding)
    }

    /// Acquires a GPU and binds the three WGPU kernels.
    ///
    /// On failure the builder is returned unchanged and a warning is logged.
    #[cfg(feature = "wgpu")]
    #[must_use]
    pub fn with_gpu_kernels(self, config: &KernelConfig) -> Self {
        use crate::kernels::wgpu::{GpuAdd, GpuContext, GpuEmbedding, GpuRmsNorm};

        match GpuContext::new(config.gpu_preference) {
            Ok(ctx) => {
                let ctx = Arc::new(ctx);
                self.register_rmsnorm(GpuRmsNorm::new(Arc::clone(&ctx), config.eps))
                    .register_add(GpuAdd::new(Arc::clone(&ctx)))
                    .register_embedding(GpuEmbedding::new(ctx))
            }
            Err(err) => {
                tracing::warn!(error = %err, "GPU unavailable; GPU kernels left unbound");
                self
            }
        }
    }

    /// Freezes the bindings.
    #[must_use]
    pub fn build(self) -> KernelRegistry {
        let registry = KernelRegistry { table: self.table };
        tracing::info!(bindings = registry.len(), "kernel registry built");
        registry
    }

    fn insert(mut self, entry: KernelEntry) -> Self {
        let (op, device) = (entry.op(), entry.device());
        if device == DeviceType::Unknown {
            tracing::warn!(%op, kernel = entry.name(), "refusing kernel bound to unknown device");
            return self;
        }
        let slot = &mut self.table[op.index()][device.index()];
        if let Some(previous) = slot.as_ref() {
            tracing::warn!(
                %op,
                %device,
                previous = previous.name(),
                replacement = entry.name(),
                "replacing kernel binding"
            );
        }
        *slot = Some(entry);
        self
    }
}
