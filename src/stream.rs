//! Opaque execution-queue tokens.

use core::fmt;
use core::num::NonZeroU64;

/// Token identifying the queue a kernel launch is ordered on.
///
/// Only meaningful on asynchronous devices; CPU kernels ignore it. The
/// registry never owns streams, the caller supplies one per launch. Launches
/// carrying the same handle are submitted in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamHandle(Option<NonZeroU64>);

impl StreamHandle {
    /// The null stream (synchronous devices, or the device's default queue).
    pub const NULL: Self = Self(None);

    /// Wraps a raw stream id. Zero maps to [`StreamHandle::NULL`].
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(NonZeroU64::new(id))
    }

    /// Raw id, `0` for the null stream.
    #[must_use]
    pub const fn raw(self) -> u64 {
        match self.0 {
            Some(id) => id.get(),
            None => 0,
        }
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "stream#{id}"),
            None => f.write_str("stream#null"),
        }
    }
}
