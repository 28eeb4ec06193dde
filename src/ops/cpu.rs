//! CPU kernels.
//!
//! Every kernel call is one [`ThreadSplitter::execute_each`] over the neurons of
//! a layer. The items handed to the units are the neuron's own error slot, or
//! its own weight row plus bias, so the writes are disjoint by construction.

use rayon::ThreadPoolBuildError;

use super::dispatch::Kernels;
use super::{neuron_error, update_neuron, HiddenLayer, WeightUpdate};
use crate::backend::ThreadingType;
use crate::splitter::ThreadSplitter;

/// Kernels that fan out over a bounded worker pool.
#[derive(Debug)]
pub struct CpuKernels {
    splitter: ThreadSplitter,
}

impl CpuKernels {
    /// Starts a pool of `workers` threads (at least one).
    ///
    /// # Errors
    /// Fails if the worker pool cannot be started.
    pub fn new(workers: usize) -> Result<Self, ThreadPoolBuildError> {
        Ok(Self { splitter: ThreadSplitter::new(workers)? })
    }

    /// Size of the worker pool.
    pub fn workers(&self) -> usize {
        self.splitter.workers()
    }
}

impl Kernels for CpuKernels {
    fn threading_type(&self) -> ThreadingType {
        ThreadingType::Cpu
    }

    fn layer_error(&self, layer: &HiddenLayer<'_>) -> Vec<f32> {
        layer.assert_shape();
        let mut error = vec![0.0; layer.layer_size()];
        self.splitter
            .execute_each(error.iter_mut(), |gid, slot| *slot = neuron_error(layer, gid));
        error
    }

    fn update_weights(&self, update: WeightUpdate<'_>) {
        update.assert_shape();
        let WeightUpdate { weights, bias_weights, error, input, learning_rate } = update;

        if input.is_empty() {
            // no weight rows to hand out, biases still move
            self.splitter.execute_each(bias_weights.iter_mut(), |gid, bias| {
                update_neuron(&mut [], bias, error[gid], input, learning_rate)
            });
            return;
        }

        let rows = weights.chunks_mut(input.len()).zip(bias_weights.iter_mut());
        self.splitter.execute_each(rows, |gid, (row, bias)| {
            update_neuron(row, bias, error[gid], input, learning_rate)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn layer_error_matches_per_index_formula() {
        let kernels = CpuKernels::new(3).unwrap();
        let weighted_sum = [0.3, -0.2, 1.1, 0.0];
        let next_weights: Vec<f32> = (0..8).map(|i| i as f32 * 0.25 - 1.0).collect();
        let layer = HiddenLayer {
            weighted_sum: &weighted_sum,
            af_type: 1,
            next_weights: &next_weights,
            next_error: &[0.5, -0.75],
        };
        let error = kernels.layer_error(&layer);
        assert_eq!(error.len(), 4);
        for (gid, e) in error.iter().enumerate() {
            assert_abs_diff_eq!(*e, neuron_error(&layer, gid));
        }
    }

    #[test]
    fn update_weights_touches_only_own_rows() {
        let kernels = CpuKernels::new(2).unwrap();
        let mut weights = vec![0.0; 6];
        let mut bias = vec![0.0; 3];
        kernels.update_weights(WeightUpdate {
            weights: &mut weights,
            bias_weights: &mut bias,
            error: &[1.0, 0.0, -2.0],
            input: &[1.0, 2.0],
            learning_rate: 0.5,
        });
        assert_eq!(weights, vec![0.5, 1.0, 0.0, 0.0, -1.0, -2.0]);
        assert_eq!(bias, vec![0.5, 0.0, -1.0]);
    }

    #[test]
    fn empty_input_still_moves_bias() {
        let kernels = CpuKernels::new(2).unwrap();
        let mut bias = vec![1.0, 1.0];
        kernels.update_weights(WeightUpdate {
            weights: &mut [],
            bias_weights: &mut bias,
            error: &[1.0, -1.0],
            input: &[],
            learning_rate: 0.25,
        });
        assert_abs_diff_eq!(bias[0], 1.25);
        assert_abs_diff_eq!(bias[1], 0.75);
    }

    #[test]
    #[should_panic(expected = "weights shape mismatch")]
    fn rejects_short_weights() {
        let kernels = CpuKernels::new(1).unwrap();
        kernels.update_weights(WeightUpdate {
            weights: &mut [0.0; 3],
            bias_weights: &mut [0.0; 2],
            error: &[1.0, 1.0],
            input: &[1.0, 1.0],
            learning_rate: 1.0,
        });
    }
}
