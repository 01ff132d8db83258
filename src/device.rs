//! Compute device tags.
//!
//! Every [`Tensor`](crate::tensor::Tensor) carries a [`DeviceType`] and every
//! kernel is bound to exactly one. The registry uses the tag as a dense index,
//! so the enumeration is closed: adding an accelerator means adding a variant
//! here, a kernel module, and one builder call in the registry presets.
//!
//! # Supported Devices
//!
//! - `Cpu`: Pure Rust kernels parallelised with `rayon` (always available).
//! - `Gpu`: Asynchronous accelerator, backed by `wgpu` compute shaders when
//!   the `wgpu` feature is enabled.
//! - `Unknown`: Unrecognized tag; never has kernels bound.

use core::convert::TryFrom;
use core::fmt;

/// Enumeration of compute devices a tensor buffer can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DeviceType {
    /// Unrecognized device. Lookups for it always fail.
    Unknown = 0,
    /// Host CPU (default). Kernels are synchronous.
    #[default]
    Cpu = 1,
    /// GPU accelerator. Kernels run on a device queue.
    Gpu = 2,
}

impl DeviceType {
    /// Number of device tags, used to size dispatch tables.
    pub const COUNT: usize = 3;

    /// Every device tag, in index order.
    pub const ALL: [Self; Self::COUNT] = [Self::Unknown, Self::Cpu, Self::Gpu];

    /// Dense index of this device in `0..COUNT`.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether kernels on this device complete before returning.
    #[must_use]
    pub const fn is_synchronous(self) -> bool {
        matches!(self, Self::Cpu)
    }

    /// Short lowercase name, as used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        }
    }
}

impl TryFrom<u8> for DeviceType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Cpu),
            2 => Ok(Self::Gpu),
            other => Err(other),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
