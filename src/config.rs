//! Runtime configuration for building a kernel registry.
//!
//! Compile-time choices are Cargo features (`wgpu` enables the GPU kernels);
//! everything decided at startup lives in [`KernelConfig`], which
//! [`KernelRegistry::from_config`](crate::registry::KernelRegistry::from_config)
//! consumes once. Nothing here is global.

use crate::error::{KernelError, KernelResult};
use briny::prelude::{Validate, ValidationError};

/// Epsilon added to the mean square in RMSNorm.
pub const DEFAULT_EPS: f32 = 1e-5;

/// Which GPU adapter to ask for when several are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuPreference {
    /// Integrated / power-saving adapter.
    LowPower,
    /// Discrete / fastest adapter.
    #[default]
    HighPerformance,
}

/// Startup configuration for the kernel registry.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelConfig {
    /// RMSNorm epsilon, shared by every device's kernel.
    pub eps: f32,
    /// Try to bind GPU kernels. Ignored without the `wgpu` feature.
    pub gpu: bool,
    /// Adapter preference used when acquiring the GPU.
    pub gpu_preference: GpuPreference,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            eps: DEFAULT_EPS,
            gpu: true,
            gpu_preference: GpuPreference::default(),
        }
    }
}

impl KernelConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that never binds GPU kernels.
    #[must_use]
    pub fn cpu_only() -> Self {
        Self::default().with_gpu(false)
    }

    #[must_use]
    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    #[must_use]
    pub fn with_gpu(mut self, gpu: bool) -> Self {
        self.gpu = gpu;
        self
    }

    #[must_use]
    pub fn with_gpu_preference(mut self, preference: GpuPreference) -> Self {
        self.gpu_preference = preference;
        self
    }

    /// Checks the configuration is usable.
    ///
    /// # Errors
    ///
    /// [`KernelError::InvalidConfig`] if `eps` is negative or not finite.
    pub fn check(&self) -> KernelResult<()> {
        self.validate().map_err(|_| {
            KernelError::InvalidConfig(format!(
                "eps must be finite and non-negative, got {}",
                self.eps
            ))
        })
    }
}

impl Validate for KernelConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !self.eps.is_finite() || self.eps < 0.0 {
            return Err(ValidationError);
        }
        Ok(())
    }
}
