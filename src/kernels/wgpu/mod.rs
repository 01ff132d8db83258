//! GPU kernels using WGPU.
//!
//! This module implements the three dispatchable operations as WGSL compute
//! shaders bound to [`DeviceType::Gpu`](crate::device::DeviceType::Gpu):
//!
//! - [`GpuRmsNorm`]: RMS normalization, one invocation per row
//! - [`GpuAdd`]: element-wise addition
//! - [`GpuEmbedding`]: row gather, one invocation per output element
//!
//! A [`GpuContext`] owns the device, the queue and the compiled pipelines.
//! It is created once (usually by
//! [`KernelRegistry::from_config`](crate::registry::KernelRegistry::from_config))
//! and shared by the kernels through an `Arc`.
//!
//! Tensors are host-mirrored. Each launch uploads its inputs, submits one
//! command buffer labelled with the caller's stream, and reads the result
//! back into the output tensor; the readback is the synchronization point.

use crate::config::GpuPreference;
use crate::stream::StreamHandle;
use briny::prelude::{Validate, ValidationError};
use core::fmt;
use std::sync::mpsc;
use thiserror::Error;
use wgpu::util::DeviceExt;

mod add;
mod embedding;
mod rmsnorm;

pub use self::add::GpuAdd;
pub use self::embedding::GpuEmbedding;
pub use self::rmsnorm::GpuRmsNorm;

const RMSNORM: &str = include_str!("shaders/rmsnorm.wgsl");
const ADD: &str = include_str!("shaders/add.wgsl");
const EMBEDDING: &str = include_str!("shaders/embedding.wgsl");

/// Invocations per workgroup; matches `@workgroup_size` in every shader.
const WORKGROUP_SIZE: u32 = 64;

/// Basic wrapper for common GPU errors.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("adapter error: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("device error: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("poll error: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error("buffer map error: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
}

/// A type of error closely related to the GPU.
#[derive(Debug)]
pub struct GpuFailure {
    /// The optional type of failure that occurred.
    pub kind: Option<GpuError>,
    /// The optional message explaining the failure.
    pub message: Option<String>,
}

impl From<GpuError> for GpuFailure {
    fn from(kind: GpuError) -> Self {
        Self {
            kind: Some(kind),
            message: None,
        }
    }
}

macro_rules! gpu_failure_from {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for GpuFailure {
                fn from(err: $err) -> Self {
                    GpuError::from(err).into()
                }
            }
        )*
    };
}

gpu_failure_from!(
    wgpu::RequestAdapterError,
    wgpu::RequestDeviceError,
    wgpu::PollError,
    wgpu::BufferAsyncError,
);

impl GpuFailure {
    fn msg(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            message: Some(message.into()),
        }
    }
}

impl fmt::Display for GpuFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.message) {
            (Some(kind), _) => write!(f, "GPU failure: {kind}"),
            (None, Some(msg)) => write!(f, "GPU failure: {msg}"),
            (None, None) => write!(f, "Unknown GPU failure"),
        }
    }
}

impl std::error::Error for GpuFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.as_ref().map(|k| k as &(dyn std::error::Error + 'static))
    }
}

/// Wrapper for WGSL source code compiled into the crate.
struct WgslSource<'a>(&'a str);

impl Validate for WgslSource<'_> {
    fn validate(&self) -> Result<(), ValidationError> {
        let src = self.0;

        if src.len() > 65536 || !src.contains("fn main") {
            return Err(ValidationError);
        }

        // no source inclusion or escape hatches
        let forbidden = ["import", "#include", "asm", "unsafe", "ptr<"];
        if forbidden.iter().any(|bad| src.contains(bad)) {
            return Err(ValidationError);
        }

        Ok(())
    }
}

/// A compiled shader with the bind group layout it expects.
///
/// Binding 0 is a uniform parameter block, bindings `1..=inputs` are read-only
/// storage, and the last binding is the read-write output.
struct ComputeKernel {
    label: &'static str,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

fn buffer_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl ComputeKernel {
    fn compile(
        device: &wgpu::Device,
        label: &'static str,
        source: &str,
        inputs: u32,
    ) -> Result<Self, GpuFailure> {
        WgslSource(source)
            .validate()
            .map_err(|_| GpuFailure::msg(format!("shader `{label}` failed validation")))?;

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let mut entries = vec![buffer_entry(0, wgpu::BufferBindingType::Uniform)];
        entries.extend((1..=inputs).map(|binding| {
            buffer_entry(binding, wgpu::BufferBindingType::Storage { read_only: true })
        }));
        entries.push(buffer_entry(
            inputs + 1,
            wgpu::BufferBindingType::Storage { read_only: false },
        ));

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        Ok(Self {
            label,
            layout,
            pipeline,
        })
    }
}

/// Holds the WGPU device and queue used for executing compute pipelines.
pub struct GpuContext {
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// The device's submission queue.
    pub queue: wgpu::Queue,
    adapter: wgpu::AdapterInfo,
    rmsnorm: ComputeKernel,
    add: ComputeKernel,
    embedding: ComputeKernel,
}

impl fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter.name)
            .field("backend", &self.adapter.backend)
            .finish_non_exhaustive()
    }
}

impl GpuContext {
    /// Acquires an adapter and device, then compiles every kernel pipeline.
    ///
    /// # Errors
    ///
    /// Fails if no adapter matches, the device request is refused, or a
    /// shader does not pass validation.
    ///
    /// # Internals
    ///
    /// - Uses `pollster::block_on` to synchronously wait for async WGPU calls
    /// - Requests the adapter's own limits so large weight tables fit
    pub fn new(preference: GpuPreference) -> Result<Self, GpuFailure> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: match preference {
                GpuPreference::LowPower => wgpu::PowerPreference::LowPower,
                GpuPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
            },
            force_fallback_adapter: false,
            compatible_surface: None,
        }))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("kernel_dispatch"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))?;

        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "acquired GPU");

        Ok(Self {
            rmsnorm: ComputeKernel::compile(&device, "rmsnorm", RMSNORM, 2)?,
            add: ComputeKernel::compile(&device, "add", ADD, 2)?,
            embedding: ComputeKernel::compile(&device, "embedding", EMBEDDING, 2)?,
            device,
            queue,
            adapter: info,
        })
    }

    /// Name of the adapter backing this context.
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter.name
    }

    /// Uploads `inputs`, runs `kernel` over `invocations` threads and reads
    /// the result back into `output`.
    fn run(
        &self,
        kernel: &ComputeKernel,
        stream: StreamHandle,
        params: [u32; 4],
        inputs: [&[u8]; 2],
        output: &mut [f32],
        invocations: usize,
    ) -> Result<(), GpuFailure> {
        if output.is_empty() || invocations == 0 {
            return Ok(());
        }
        let (groups_x, groups_y) = grid(invocations)?;
        let out_size = core::mem::size_of_val(output) as u64;
        let device = &self.device;

        let limits = device.limits();
        for (i, contents) in inputs.iter().enumerate() {
            check_buffer_size(kernel.label, &format!("input {i}"), contents.len() as u64, &limits)?;
        }
        check_buffer_size(kernel.label, "output", out_size, &limits)?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("params"),
            contents: bytemuck::cast_slice(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let input_bufs = inputs.map(|contents| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("input"),
                contents,
                usage: wgpu::BufferUsages::STORAGE,
            })
        });
        let output_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("output"),
            size: out_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size: out_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.label),
            layout: &kernel.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input_bufs[0].as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: input_bufs[1].as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: output_buf.as_entire_binding(),
                },
            ],
        });

        let label = format!("{}@{stream}", kernel.label);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&label),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        encoder.copy_buffer_to_buffer(&output_buf, 0, &staging, 0, out_size);
        self.queue.submit(Some(encoder.finish()));

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuFailure::msg(format!("`{}` launch rejected: {err}", kernel.label)));
        }

        let (tx, rx) = mpsc::channel();
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        device.poll(wgpu::PollType::Wait)?;
        rx.recv()
            .map_err(|_| GpuFailure::msg("buffer map callback dropped"))??;

        {
            let view = staging.slice(..).get_mapped_range();
            let data: &[f32] = bytemuck::try_cast_slice(&view[..])
                .map_err(|e| GpuFailure::msg(format!("readback cast failed: {e}")))?;
            output.copy_from_slice(data);
        }
        staging.unmap();

        Ok(())
    }
}

/// Workgroup grid for `invocations` threads, spilling into `y` past the
/// per-dimension dispatch limit.
fn grid(invocations: usize) -> Result<(u32, u32), GpuFailure> {
    const MAX_GROUPS: u32 = 65535;

    let groups = u32::try_from(invocations.div_ceil(WORKGROUP_SIZE as usize))
        .map_err(|_| GpuFailure::msg(format!("{invocations} invocations exceed dispatch range")))?;
    if groups <= MAX_GROUPS {
        return Ok((groups, 1));
    }
    let rows = groups.div_ceil(MAX_GROUPS);
    if rows > MAX_GROUPS {
        return Err(GpuFailure::msg(format!(
            "{invocations} invocations exceed dispatch range"
        )));
    }
    Ok((MAX_GROUPS, rows))
}

/// Checks a storage buffer of `bytes` fits both the buffer and binding limits.
fn check_buffer_size(
    kernel: &str,
    name: &str,
    bytes: u64,
    limits: &wgpu::Limits,
) -> Result<(), GpuFailure> {
    let max = limits
        .max_buffer_size
        .min(u64::from(limits.max_storage_buffer_binding_size));
    if bytes > max {
        return Err(GpuFailure::msg(format!(
            "`{kernel}` {name} buffer of {bytes} bytes exceeds device limit of {max} bytes"
        )));
    }
    Ok(())
}

/// Converts a size into a shader parameter.
fn param(name: &str, value: usize) -> Result<u32, GpuFailure> {
    u32::try_from(value).map_err(|_| GpuFailure::msg(format!("{name} = {value} exceeds u32")))
}
