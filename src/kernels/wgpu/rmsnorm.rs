//! RMSNorm compute shader kernel.

use super::{GpuContext, param};
use crate::device::DeviceType;
use crate::error::KernelResult;
use crate::kernels::{RmsNormKernel, check_rmsnorm, f32_data, f32_data_mut};
use crate::stream::StreamHandle;
use crate::tensor::Tensor;
use std::sync::Arc;

/// RMSNorm on the GPU, one invocation per row.
#[derive(Debug, Clone)]
pub struct GpuRmsNorm {
    ctx: Arc<GpuContext>,
    eps: f32,
}

impl GpuRmsNorm {
    #[must_use]
    pub fn new(ctx: Arc<GpuContext>, eps: f32) -> Self {
        Self { ctx, eps }
    }

    #[must_use]
    pub const fn eps(&self) -> f32 {
        self.eps
    }
}

impl RmsNormKernel for GpuRmsNorm {
    fn name(&self) -> &str {
        "wgpu_rmsnorm"
    }

    fn device(&self) -> DeviceType {
        DeviceType::Gpu
    }

    fn launch(
        &self,
        input: &Tensor,
        weight: &Tensor,
        output: &mut Tensor,
        stream: StreamHandle,
    ) -> KernelResult<()> {
        check_rmsnorm(self.device(), input, weight, output)?;
        tracing::debug!(kernel = self.name(), shape = ?input.shape(), %stream, "launch");

        let rows = input.rows();
        param("input elements", input.len())?;
        let params = [
            param("rows", rows)?,
            param("dim", input.last_dim())?,
            self.eps.to_bits(),
            0,
        ];
        let x = f32_data("input", input)?;
        let gamma = f32_data("weight", weight)?;
        let y = f32_data_mut("output", output)?;

        self.ctx.run(
            &self.ctx.rmsnorm,
            stream,
            params,
            [bytemuck::cast_slice(x), bytemuck::cast_slice(gamma)],
            y,
            rows,
        )?;
        Ok(())
    }
}
