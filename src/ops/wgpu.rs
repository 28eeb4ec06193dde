//! GPU compute kernels using WGPU.
//!
//! The device context and both compute pipelines are created once, on first
//! use, via `lazy_static`. Creation failures are logged and leave the device
//! slot empty; every entry point then returns `None` / `false` so the caller can
//! fall back to the host batch.
//!
//! - `layer_error`: one invocation per hidden neuron
//! - `update_weights`: one invocation per neuron, looping over its fan-in
//!
//! Each call uploads the layer, dispatches once, and blocks until the results
//! are read back.

use briny::prelude::*;
use wgpu::util::DeviceExt;

use super::{HiddenLayer, WeightUpdate};

const LAYER_ERROR: &str = include_str!("shaders/layer_error.wgsl");
const UPDATE_WEIGHTS: &str = include_str!("shaders/update_weights.wgsl");

const WORKGROUP_SIZE: u32 = 64;

/// Basic wrapper for common GPU errors.
#[derive(Debug)]
pub enum GpuError {
    /// An error in requesting the adapter.
    Adapter(wgpu::RequestAdapterError),
    /// An error in requesting the device.
    Device(wgpu::RequestDeviceError),
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuError::Adapter(e) => write!(f, "Adapter error: {e}"),
            GpuError::Device(e) => write!(f, "Device error: {e}"),
        }
    }
}

/// A failure while preparing or running a kernel.
#[derive(Debug)]
pub enum GpuFailure {
    /// Adapter or device acquisition failed.
    Gpu(GpuError),
    /// A shader source failed validation.
    Validation(ValidationError),
    /// Anything else, described in text.
    Message(String),
}

impl From<GpuError> for GpuFailure {
    fn from(kind: GpuError) -> Self {
        Self::Gpu(kind)
    }
}

impl From<ValidationError> for GpuFailure {
    fn from(kind: ValidationError) -> Self {
        Self::Validation(kind)
    }
}

impl From<&str> for GpuFailure {
    fn from(msg: &str) -> Self {
        Self::Message(msg.to_string())
    }
}

impl std::fmt::Display for GpuFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            GpuFailure::Gpu(kind) => write!(f, "GPU failure: {kind}"),
            GpuFailure::Validation(err) => write!(f, "GPU failure: shader validation: {err:?}"),
            GpuFailure::Message(msg) => write!(f, "GPU failure: {msg}"),
        }
    }
}

impl std::error::Error for GpuFailure {}

/// Holds the WGPU device and queue used for executing compute pipelines.
pub struct GpuContext {
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// The submission queue of the device.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Selects the default adapter and creates a device + queue.
    ///
    /// Uses `pollster::block_on` to wait for the async WGPU calls.
    ///
    /// # Errors
    /// `GpuError` if adapter or device acquisition fails.
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(GpuError::Adapter)?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(GpuError::Device)?;

        Ok(Self { device, queue })
    }
}

/// Wrapper for WGSL source that must pass validation before compilation.
pub struct WgslSource<'a>(pub &'a str);

impl Validate for WgslSource<'_> {
    fn validate(&self) -> Result<(), ValidationError> {
        let src = self.0;

        if src.len() > 65536 || !src.contains("fn main") {
            return Err(ValidationError);
        }

        if src.contains("import") || src.contains("#include") {
            return Err(ValidationError);
        }

        let forbidden = ["asm", "unsafe", "ptr", "std::"];
        if forbidden.iter().any(|bad| src.contains(bad)) {
            return Err(ValidationError);
        }

        Ok(())
    }
}

/// Validates a WGSL shader and compiles it on `device`.
pub fn load_shader(
    device: &wgpu::Device,
    label: &str,
    source: &str,
) -> Result<wgpu::ShaderModule, GpuFailure> {
    WgslSource(source).validate()?;

    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    }))
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// A compiled compute pipeline with its bind group layout.
struct Kernel {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl Kernel {
    fn new(
        device: &wgpu::Device,
        label: &str,
        source: &str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Result<Self, GpuFailure> {
        let module = load_shader(device, label, source)?;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries,
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
        Ok(Self { layout, pipeline })
    }
}

/// Device context plus the two backpropagation kernels.
struct Device {
    ctx: GpuContext,
    layer_error: Kernel,
    update_weights: Kernel,
}

impl Device {
    fn new() -> Result<Self, GpuFailure> {
        let ctx = GpuContext::new()?;
        let layer_error = Kernel::new(
            &ctx.device,
            "layer_error",
            LAYER_ERROR,
            &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, false),
            ],
        )?;
        let update_weights = Kernel::new(
            &ctx.device,
            "update_weights",
            UPDATE_WEIGHTS,
            &[
                uniform_entry(0),
                storage_entry(1, false),
                storage_entry(2, false),
                storage_entry(3, true),
                storage_entry(4, true),
            ],
        )?;
        tracing::info!("GPU kernels compiled");
        Ok(Self { ctx, layer_error, update_weights })
    }

    fn upload(&self, label: &str, data: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: data,
            usage,
        })
    }

    /// Binds `buffers` in order, dispatches one invocation per neuron, then
    /// copies each `(buffer, out)` pair in `read_back` into `out`.
    fn run(
        &self,
        kernel: &Kernel,
        buffers: &[&wgpu::Buffer],
        neurons: usize,
        read_back: &mut [(&wgpu::Buffer, &mut [f32])],
    ) -> Result<(), GpuFailure> {
        let device = &self.ctx.device;

        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &kernel.layout,
            entries: &entries,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("backprop_encoder"),
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("backprop_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups((neurons as u32).div_ceil(WORKGROUP_SIZE), 1, 1);
        }

        let staging: Vec<wgpu::Buffer> = read_back
            .iter()
            .map(|(src, out)| {
                let size = std::mem::size_of_val(&**out) as u64;
                let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("staging"),
                    size,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                encoder.copy_buffer_to_buffer(src, 0, &buffer, 0, size);
                buffer
            })
            .collect();

        self.ctx.queue.submit(Some(encoder.finish()));
        for buffer in &staging {
            buffer.slice(..).map_async(wgpu::MapMode::Read, |_| {});
        }
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| GpuFailure::Message(format!("device poll failed: {e:?}")))?;

        for (buffer, (_, out)) in staging.iter().zip(read_back.iter_mut()) {
            let view = buffer.slice(..).get_mapped_range();
            out.copy_from_slice(bytes_to_f32_slice(&view)?);
            drop(view);
            buffer.unmap();
        }

        Ok(())
    }
}

lazy_static::lazy_static! {
    static ref DEVICE: Option<Device> = match Device::new() {
        Ok(device) => Some(device),
        Err(err) => {
            tracing::warn!(%err, "GPU kernels unavailable");
            None
        }
    };
}

fn as_bytes<T: Copy>(data: &[T]) -> &[u8] {
    let len = std::mem::size_of_val(data);
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, len) }
}

fn bytes_to_f32_slice(data: &[u8]) -> Result<&[f32], &'static str> {
    use std::mem::{align_of, size_of};

    if data.as_ptr() as usize % align_of::<f32>() != 0 {
        return Err("unaligned buffer");
    }

    if data.len() % size_of::<f32>() != 0 {
        return Err("buffer length is not a multiple of f32");
    }

    let len = data.len() / size_of::<f32>();
    let ptr = data.as_ptr() as *const f32;
    unsafe { Ok(std::slice::from_raw_parts(ptr, len)) }
}

/// Computes a hidden layer's error signals on the GPU.
///
/// # Returns
/// - `Some(error)` on success
/// - `None` if there is no device, a buffer would be empty, or the dispatch fails
pub fn wgpu_layer_error(layer: &HiddenLayer<'_>) -> Option<Vec<f32>> {
    let device = DEVICE.as_ref()?;
    let size = layer.layer_size();
    if size == 0 || layer.next_layer_size() == 0 {
        return None;
    }

    let dims = [size as u32, layer.next_layer_size() as u32, layer.af_type as u32, 0u32];
    let dims_buf = device.upload("dims", as_bytes(&dims), wgpu::BufferUsages::UNIFORM);
    let sum_buf = device.upload("weighted_sum", as_bytes(layer.weighted_sum), wgpu::BufferUsages::STORAGE);
    let weights_buf = device.upload("next_weights", as_bytes(layer.next_weights), wgpu::BufferUsages::STORAGE);
    let next_buf = device.upload("next_error", as_bytes(layer.next_error), wgpu::BufferUsages::STORAGE);

    let mut error = vec![0.0f32; size];
    let error_buf = device.upload(
        "layer_error",
        as_bytes(&error),
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
    );

    let result = device.run(
        &device.layer_error,
        &[&dims_buf, &sum_buf, &weights_buf, &next_buf, &error_buf],
        size,
        &mut [(&error_buf, &mut error)],
    );

    match result {
        Ok(()) => Some(error),
        Err(err) => {
            tracing::warn!(%err, "layer error dispatch failed");
            None
        }
    }
}

/// Applies a layer's weight update on the GPU, in place.
///
/// # Returns
/// - `true` if the update was applied
/// - `false` if there is no device, a buffer would be empty, or the dispatch
///   fails; `update` is then untouched
pub fn wgpu_update_weights(update: &mut WeightUpdate<'_>) -> bool {
    let Some(device) = DEVICE.as_ref() else {
        return false;
    };
    let size = update.error.len();
    if size == 0 || update.input.is_empty() {
        return false;
    }

    let dims = [
        size as u32,
        update.input.len() as u32,
        update.learning_rate.to_bits(),
        0u32,
    ];
    let read_write = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
    let dims_buf = device.upload("dims", as_bytes(&dims), wgpu::BufferUsages::UNIFORM);
    let weights_buf = device.upload("weights", as_bytes(update.weights), read_write);
    let bias_buf = device.upload("bias_weights", as_bytes(update.bias_weights), read_write);
    let error_buf = device.upload("layer_error", as_bytes(update.error), wgpu::BufferUsages::STORAGE);
    let input_buf = device.upload("layer_input", as_bytes(update.input), wgpu::BufferUsages::STORAGE);

    // read into scratch so a failed dispatch leaves the layer untouched
    let mut weights = vec![0.0f32; update.weights.len()];
    let mut bias = vec![0.0f32; update.bias_weights.len()];

    let result = device.run(
        &device.update_weights,
        &[&dims_buf, &weights_buf, &bias_buf, &error_buf, &input_buf],
        size,
        &mut [(&weights_buf, &mut weights), (&bias_buf, &mut bias)],
    );

    match result {
        Ok(()) => {
            update.weights.copy_from_slice(&weights);
            update.bias_weights.copy_from_slice(&bias);
            true
        }
        Err(err) => {
            tracing::warn!(%err, "weight update dispatch failed");
            false
        }
    }
}
