//! Parallel CPU kernels
//!
//! # CPU Backend
//!
//! Host implementations of the three dispatchable operations, bound to
//! [`DeviceType::Cpu`]. They are synchronous: the output is valid as soon as
//! `launch` returns, and the [`StreamHandle`] is ignored.
//!
//! ## Features
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon)
//! - Row-parallel RMSNorm and embedding gather, chunk-parallel add
//!
//! ## Implemented Ops
//!
//! - [`CpuRmsNorm`]: RMS normalization over the last axis
//! - [`CpuAdd`]: element-wise addition
//! - [`CpuEmbedding`]: row gather by integer index
//!
//! ## Design Goals
//!
//! - Deterministic results (each output element is written by exactly one task)
//! - Contract checks run before the output is touched

use super::{
    AddKernel, EmbeddingKernel, RmsNormKernel, check_add, check_embedding, check_rmsnorm,
    f32_data, f32_data_mut, i32_data,
};
use crate::config::DEFAULT_EPS;
use crate::device::DeviceType;
use crate::error::KernelResult;
use crate::stream::StreamHandle;
use crate::tensor::Tensor;
use rayon::prelude::*;

/// Elements handed to one rayon task by [`CpuAdd`].
const ADD_CHUNK: usize = 4096;

/// RMSNorm on the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuRmsNorm {
    eps: f32,
}

impl CpuRmsNorm {
    #[must_use]
    pub const fn new(eps: f32) -> Self {
        Self { eps }
    }

    #[must_use]
    pub const fn eps(&self) -> f32 {
        self.eps
    }
}

impl Default for CpuRmsNorm {
    fn default() -> Self {
        Self::new(DEFAULT_EPS)
    }
}

impl RmsNormKernel for CpuRmsNorm {
    fn name(&self) -> &str {
        "cpu_rmsnorm"
    }

    fn device(&self) -> DeviceType {
        DeviceType::Cpu
    }

    /// Normalizes each row of `input` by its root mean square.
    ///
    /// # Optimizations
    ///
    /// - One rayon task per row; rows are independent
    #[allow(clippy::cast_precision_loss)]
    fn launch(
        &self,
        input: &Tensor,
        weight: &Tensor,
        output: &mut Tensor,
        stream: StreamHandle,
    ) -> KernelResult<()> {
        check_rmsnorm(self.device(), input, weight, output)?;
        tracing::debug!(kernel = self.name(), shape = ?input.shape(), %stream, "launch");

        let dim = input.last_dim();
        if dim == 0 {
            return Ok(());
        }
        let x = f32_data("input", input)?;
        let gamma = f32_data("weight", weight)?;
        let y = f32_data_mut("output", output)?;
        let eps = self.eps;

        y.par_chunks_mut(dim)
            .zip(x.par_chunks(dim))
            .for_each(|(out_row, in_row)| {
                let mean = in_row.iter().map(|v| v * v).sum::<f32>() / dim as f32;
                let scale = (mean + eps).sqrt().recip();
                out_row
                    .iter_mut()
                    .zip(in_row)
                    .zip(gamma)
                    .for_each(|((o, &v), &g)| *o = v * g * scale);
            });

        Ok(())
    }
}

/// Element-wise addition on the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuAdd;

impl AddKernel for CpuAdd {
    fn name(&self) -> &str {
        "cpu_add"
    }

    fn device(&self) -> DeviceType {
        DeviceType::Cpu
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

        let a = f32_data("input1", input1)?;
        let b = f32_data("input2", input2)?;
        let y = f32_data_mut("output", output)?;

        y.par_chunks_mut(ADD_CHUNK)
            .zip(a.par_chunks(ADD_CHUNK))
            .zip(b.par_chunks(ADD_CHUNK))
            .for_each(|((out, lhs), rhs)| {
                out.iter_mut()
                    .zip(lhs.iter().zip(rhs))
                    .for_each(|(o, (&p, &q))| *o = p + q);
            });

        Ok(())
    }
}

/// Embedding gather on the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuEmbedding;

impl EmbeddingKernel for CpuEmbedding {
    fn name(&self) -> &str {
        "cpu_embedding"
    }

    fn device(&self) -> DeviceType {
        DeviceType::Cpu
    }

    /// Gathers one weight row per index.
    ///
    /// # Panics
    ///
    /// Panics if an index lies outside `[0, vocab_size)`. Callers are expected
    /// to have run [`validate_indices`](super::validate_indices) first.
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

        if dim == 0 {
            return Ok(());
        }
        let indices = i32_data("input", input)?;
        let table = f32_data("weight", weight)?;
        let y = f32_data_mut("output", output)?;

        y.par_chunks_mut(dim)
            .zip(indices.par_iter())
            .for_each(|(row, &index)| {
                let token = match usize::try_from(index) {
                    Ok(token) if token < vocab_size => token,
                    _ => panic!("embedding index {index} is outside vocabulary of size {vocab_size}"),
                };
                let start = token * dim;
                row.copy_from_slice(&table[start..start + dim]);
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;
    use crate::tensor::DataType;

    fn cpu(shape: &[usize], data: &[f32]) -> Tensor {
        Tensor::from_f32(shape.to_vec(), data.to_vec(), DeviceType::Cpu)
    }

    #[test]
    fn rmsnorm_of_ones_is_ones() {
        let input = cpu(&[4], &[1.0; 4]);
        let weight = cpu(&[4], &[1.0; 4]);
        let mut output = Tensor::zeros(DataType::Fp32, vec![4], DeviceType::Cpu);

        CpuRmsNorm::default()
            .launch(&input, &weight, &mut output, StreamHandle::NULL)
            .unwrap();

        assert!(output.as_f32().unwrap().iter().all(|&v| (v - 1.0).abs() < 1e-4));
    }

    #[test]
    fn rmsnorm_normalizes_each_row_independently() {
        // row 0: rms = sqrt((9 + 16) / 2) = sqrt(12.5)
        // row 1: rms = 1
        let input = cpu(&[2, 2], &[3.0, 4.0, 1.0, -1.0]);
        let weight = cpu(&[2], &[1.0, 2.0]);
        let mut output = Tensor::zeros(DataType::Fp32, vec![2, 2], DeviceType::Cpu);

        CpuRmsNorm::new(0.0)
            .launch(&input, &weight, &mut output, StreamHandle::NULL)
            .unwrap();

        let rms0 = 12.5f32.sqrt();
        let expected = [3.0 / rms0, 8.0 / rms0, 1.0, -2.0];
        output
            .as_f32()
            .unwrap()
            .iter()
            .zip(expected)
            .for_each(|(&y, e)| assert!((y - e).abs() < 1e-5, "{y} != {e}"));
    }

    #[test]
    fn add_is_elementwise() {
        let a = cpu(&[3], &[1.0, 2.0, 3.0]);
        let b = cpu(&[3], &[4.0, 5.0, 6.0]);
        let mut out = Tensor::zeros(DataType::Fp32, vec![3], DeviceType::Cpu);

        CpuAdd.launch(&a, &b, &mut out, StreamHandle::NULL).unwrap();

        assert_eq!(out.as_f32().unwrap(), &[5.0, 7.0, 9.0]);
    }

    #[test]
    fn add_covers_multiple_chunks() {
        let len = ADD_CHUNK * 2 + 17;
        #[allow(clippy::cast_precision_loss)]
        let a: Vec<f32> = (0..len).map(|i| i as f32).collect();
        let b = vec![0.5; len];
        let mut out = Tensor::zeros(DataType::Fp32, vec![len], DeviceType::Cpu);

        CpuAdd
            .launch(&cpu(&[len], &a), &cpu(&[len], &b), &mut out, StreamHandle::NULL)
            .unwrap();

        let y = out.as_f32().unwrap();
        assert_eq!(y[0], 0.5);
        assert_eq!(y[len - 1], a[len - 1] + 0.5);
    }

    #[test]
    fn add_rejects_shape_mismatch_without_truncating() {
        let a = cpu(&[3], &[1.0, 2.0, 3.0]);
        let b = cpu(&[2], &[4.0, 5.0]);
        let mut out = cpu(&[3], &[-1.0; 3]);

        let err = CpuAdd.launch(&a, &b, &mut out, StreamHandle::NULL).unwrap_err();

        assert!(matches!(err, KernelError::ShapeMismatch { arg: "input2", .. }));
        assert_eq!(out.as_f32().unwrap(), &[-1.0; 3]);
    }

    #[test]
    fn embedding_gathers_rows_in_order() {
        let weight = cpu(&[3, 2], &[0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);
        let input = Tensor::from_i32(vec![3], vec![2, 0, 1], DeviceType::Cpu);
        let mut out = Tensor::zeros(DataType::Fp32, vec![3, 2], DeviceType::Cpu);

        CpuEmbedding
            .launch(&input, &weight, &mut out, 3, StreamHandle::NULL)
            .unwrap();

        assert_eq!(out.as_f32().unwrap(), &[2.0, 2.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    #[should_panic(expected = "outside vocabulary of size 3")]
    fn embedding_panics_on_out_of_range_index() {
        let weight = cpu(&[3, 2], &[0.0; 6]);
        let input = Tensor::from_i32(vec![1], vec![3], DeviceType::Cpu);
        let mut out = Tensor::zeros(DataType::Fp32, vec![1, 2], DeviceType::Cpu);

        let _ = CpuEmbedding.launch(&input, &weight, &mut out, 3, StreamHandle::NULL);
    }

    #[test]
    fn kernels_refuse_gpu_tensors() {
        let a = cpu(&[2], &[1.0, 2.0]).to_device(DeviceType::Gpu);
        let b = cpu(&[2], &[1.0, 2.0]);
        let mut out = cpu(&[2], &[0.0; 2]);

        let err = CpuAdd.launch(&a, &b, &mut out, StreamHandle::NULL).unwrap_err();

        assert!(matches!(
            err,
            KernelError::DeviceMismatch {
                arg: "input1",
                expected: DeviceType::Cpu,
                found: DeviceType::Gpu,
            }
        ));
        assert_eq!(out.as_f32().unwrap(), &[0.0; 2]);
    }
}
