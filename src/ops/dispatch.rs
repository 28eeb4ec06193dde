//! Kernel selection.
//!
//! A trainer holds one boxed [`Kernels`] built for its [`ThreadingType`]. The
//! CPU variant owns a worker pool; the GPU variant is stateless on the host.

use rayon::ThreadPoolBuildError;

use super::cpu::CpuKernels;
use super::gpu::GpuKernels;
use super::{HiddenLayer, WeightUpdate};
use crate::backend::ThreadingType;

/// Per-layer error and weight-update computation.
///
/// Implementations must give the same result as evaluating
/// [`neuron_error`](super::neuron_error) / [`update_neuron`](super::update_neuron)
/// for every index independently.
pub trait Kernels: Send + Sync + core::fmt::Debug {
    /// The mode this implementation serves.
    fn threading_type(&self) -> ThreadingType;

    /// Error signals of a hidden layer, `layer.layer_size()` long.
    ///
    /// # Panics
    /// If `next_weights` is not `layer_size * next_layer_size` long.
    fn layer_error(&self, layer: &HiddenLayer<'_>) -> Vec<f32>;

    /// Updates `weights` and `bias_weights` in place.
    ///
    /// # Panics
    /// If the slice lengths disagree with `error.len()` and `input.len()`.
    fn update_weights(&self, update: WeightUpdate<'_>);
}

/// Builds the kernels for `mode`. `workers` sizes the CPU pool and is ignored
/// for the GPU.
///
/// # Errors
/// Fails if the CPU worker pool cannot be started.
pub fn kernels_for(
    mode: ThreadingType,
    workers: usize,
) -> Result<Box<dyn Kernels>, ThreadPoolBuildError> {
    match mode {
        ThreadingType::Cpu => Ok(Box::new(CpuKernels::new(workers)?)),
        ThreadingType::Gpu => Ok(Box::new(GpuKernels::new())),
    }
}
