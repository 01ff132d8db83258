//! Element-wise add compute shader kernel.

use super::{GpuContext, param};
use crate::device::DeviceType;
use crate::error::KernelResult;
use crate::kernels::{AddKernel, check_add, f32_data, f32_data_mut};
use crate::stream::StreamHandle;
use crate::tensor::Tensor;
use std::sync::Arc;

/// Element-wise addition on the GPU.
#[derive(Debug, Clone)]
pub struct GpuAdd {
    ctx: Arc<GpuContext>,
}

impl GpuAdd {
    #[must_use]
    pub fn new(ctx: Arc<GpuContext>) -> Self {
        Self { ctx }
    }
}

impl AddKernel for GpuAdd {
    fn name(&self) -> &str {
        "wgpu_add"
    }

    fn device(&self) -> DeviceType {
        DeviceType::Gpu
    }

    fn launch(
        &self,
        input1: &Tensor,
        input2: &Tensor,
        output: &mut Tensor,
        stream: StreamHandle,
    ) -> KernelResult<()> {
        check_add(self.device(), input1, input2, output)?;
        tracing::debug!(kernel = self.name(), shape = ?input1.shape(), %stream, "launch");

        let len = input1.len();
        let params = [param("len", len)?, 0, 0, 0];
        let a = f32_data("input1", input1)?;
        let b = f32_data("input2", input2)?;
        let y = f32_data_mut("output", output)?;

        self.ctx.run(
            &self.ctx.add,
            stream,
            params,
            [bytemuck::cast_slice(a), bytemuck::cast_slice(b)],
            y,
            len,
        )?;
        Ok(())
    }
}
