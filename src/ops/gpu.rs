//! GPU kernels.
//!
//! Each kernel call is one synchronous device dispatch covering the whole layer
//! (see [`wgpu`](super::wgpu), behind the `wgpu` feature). When the feature is
//! off, no adapter is available, or the dispatch fails, the same per-index
//! formula runs as a data-parallel host batch instead. The worker pool of the
//! CPU mode is never involved.

use std::sync::Once;

use rayon::prelude::*;

use super::dispatch::Kernels;
use super::{neuron_error, update_neuron, HiddenLayer, WeightUpdate};
use crate::backend::ThreadingType;

static FALLBACK_NOTICE: Once = Once::new();

fn note_fallback() {
    FALLBACK_NOTICE.call_once(|| {
        tracing::warn!("GPU device unavailable, GPU kernels run as a host batch");
    });
}

/// Kernels issued as one batch call per layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct GpuKernels;

impl GpuKernels {
    /// Creates the kernels; the device itself is opened on first use.
    pub fn new() -> Self {
        Self
    }
}

impl Kernels for GpuKernels {
    fn threading_type(&self) -> ThreadingType {
        ThreadingType::Gpu
    }

    fn layer_error(&self, layer: &HiddenLayer<'_>) -> Vec<f32> {
        layer.assert_shape();

        #[cfg(feature = "wgpu")]
        {
            if let Some(error) = super::wgpu::wgpu_layer_error(layer) {
                return error;
            }
        }

        note_fallback();
        batch_layer_error(layer)
    }

    fn update_weights(&self, mut update: WeightUpdate<'_>) {
        update.assert_shape();

        #[cfg(feature = "wgpu")]
        {
            if super::wgpu::wgpu_update_weights(&mut update) {
                return;
            }
        }

        note_fallback();
        batch_update_weights(&mut update);
    }
}

/// Host rendition of the error kernel.
pub fn batch_layer_error(layer: &HiddenLayer<'_>) -> Vec<f32> {
    (0..layer.layer_size())
        .into_par_iter()
        .map(|gid| neuron_error(layer, gid))
        .collect()
}

/// Host rendition of the weight-update kernel.
pub fn batch_update_weights(update: &mut WeightUpdate<'_>) {
    let (error, input, learning_rate) = (update.error, update.input, update.learning_rate);

    if input.is_empty() {
        update
            .bias_weights
            .par_iter_mut()
            .enumerate()
            .for_each(|(gid, bias)| update_neuron(&mut [], bias, error[gid], input, learning_rate));
        return;
    }

    update
        .weights
        .par_chunks_mut(input.len())
        .zip(update.bias_weights.par_iter_mut())
        .enumerate()
        .for_each(|(gid, (row, bias))| update_neuron(row, bias, error[gid], input, learning_rate));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::cpu::CpuKernels;
    use approx::assert_abs_diff_eq;

    #[test]
    fn batch_matches_worker_pool() {
        let cpu = CpuKernels::new(2).unwrap();
        let weighted_sum = [0.4, -1.3, 0.05];
        let next_weights = [0.1, -0.2, 0.3, 0.7, 0.0, -0.9];
        let layer = HiddenLayer {
            weighted_sum: &weighted_sum,
            af_type: 6,
            next_weights: &next_weights,
            next_error: &[0.25, -0.5],
        };
        let host = batch_layer_error(&layer);
        let pool = cpu.layer_error(&layer);
        for (a, b) in host.iter().zip(&pool) {
            assert_abs_diff_eq!(*a, *b);
        }
    }

    #[test]
    fn gpu_kernels_update_in_place() {
        let mut weights = vec![1.0; 4];
        let mut bias = vec![0.0; 2];
        GpuKernels::new().update_weights(WeightUpdate {
            weights: &mut weights,
            bias_weights: &mut bias,
            error: &[0.5, -0.5],
            input: &[1.0, 0.0],
            learning_rate: 0.5,
        });
        assert_abs_diff_eq!(weights[0], 1.25, epsilon = 1e-6);
        assert_abs_diff_eq!(weights[1], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(weights[2], 0.75, epsilon = 1e-6);
        assert_abs_diff_eq!(bias[1], -0.25, epsilon = 1e-6);
    }
}
