//! Embedding gather compute shader kernel.

use super::{GpuContext, param};
use crate::device::DeviceType;
use crate::error::KernelResult;
use crate::kernels::{EmbeddingKernel, check_embedding, f32_data, f32_data_mut, i32_data};
use crate::stream::StreamHandle;
use crate::tensor::Tensor;
use std::sync::Arc;

/// Embedding gather on the GPU.
///
/// Rows whose index lies outside `[0, vocab_size)` come back zero-filled
/// rather than aborting the launch.
#[derive(Debug, Clone)]
pub struct GpuEmbedding {
    ctx: Arc<GpuContext>,
}

impl GpuEmbedding {
    #[must_use]
    pub fn new(ctx: Arc<GpuContext>) -> Self {
        Self { ctx }
    }
}

impl EmbeddingKernel for GpuEmbedding {
    fn name(&self) -> &str {
        "wgpu_embedding"
    }

    fn device(&self) -> DeviceType {
        DeviceType::Gpu
    }

    fn launch(
        &self,
        input: &Tensor,
        weight: &Tensor,
        output: &mut Tensor,
        vocab_size: usize,
        stream: StreamHandle,
    ) -> KernelResult<()> {
        let dim = check_embedding(self.device(), input, weight, output, vocab_size)?;
        tracing::debug!(
            kernel = self.name(),
            tokens = input.len(),
            dim,
            vocab_size,
            %stream,
            "launch"
        );

        let tokens = input.len();
        param("output elements", output.len())?;
        let params = [
            param("tokens", tokens)?,
            param("dim", dim)?,
            param("vocab_size", vocab_size)?,
            0,
        ];
        let indices = i32_data("input", input)?;
        let table = f32_data("weight", weight)?;
        let y = f32_data_mut("output", output)?;

        self.ctx.run(
            &self.ctx.embedding,
            stream,
            params,
            [bytemuck::cast_slice(indices), bytemuck::cast_slice(table)],
            y,
            tokens * dim,
        )?;
        Ok(())
    }
}
