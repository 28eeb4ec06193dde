//! # Layer Kernels
//!
//! The two per-layer computations of a backward pass, each with a CPU and a
//! GPU implementation behind the [`Kernels`](dispatch::Kernels) trait:
//!
//! - **layer error**: error signal of every neuron in a hidden layer, given the
//!   next layer's weights and errors,
//! - **weight update**: online gradient step for every neuron's weights and
//!   bias.
//!
//! ## Submodules
//!
//! - [`cpu`]: fan-out over a [`ThreadSplitter`](crate::splitter::ThreadSplitter)
//! - [`gpu`]: one device dispatch per layer, host batch fallback
//! - [`wgpu`] *(opt-in)*: compute pipelines and WGSL shaders
//! - [`dispatch`]: the shared trait and kernel selection
//!
//! Both variants evaluate the per-index formulas in this module; one index
//! only ever writes its own neuron's slots.

pub mod cpu;
pub mod dispatch;
pub mod gpu;
#[cfg(feature = "wgpu")]
pub mod wgpu;

use crate::activation;

/// Inputs of the error kernel for one hidden layer `l`.
#[derive(Debug, Clone, Copy)]
pub struct HiddenLayer<'a> {
    /// Weighted sums of layer `l`.
    pub weighted_sum: &'a [f32],
    /// Activation code of layer `l`.
    pub af_type: u8,
    /// Flattened weights of layer `l + 1`.
    pub next_weights: &'a [f32],
    /// Error signals of layer `l + 1`.
    pub next_error: &'a [f32],
}

impl HiddenLayer<'_> {
    /// Neurons in layer `l`.
    pub fn layer_size(&self) -> usize {
        self.weighted_sum.len()
    }

    /// Neurons in layer `l + 1`.
    pub fn next_layer_size(&self) -> usize {
        self.next_error.len()
    }

    pub(crate) fn assert_shape(&self) {
        assert_eq!(
            self.next_weights.len(),
            self.layer_size() * self.next_layer_size(),
            "layer error shape mismatch"
        );
    }
}

/// Inputs and in-place targets of the weight-update kernel for one layer.
#[derive(Debug)]
pub struct WeightUpdate<'a> {
    /// Flattened weights, `error.len() * input.len()` long.
    pub weights: &'a mut [f32],
    /// One bias weight per neuron.
    pub bias_weights: &'a mut [f32],
    /// Error signal per neuron.
    pub error: &'a [f32],
    /// Row input for the first layer, the previous layer's output otherwise.
    pub input: &'a [f32],
    /// Step size of the update.
    pub learning_rate: f32,
}

impl WeightUpdate<'_> {
    pub(crate) fn assert_shape(&self) {
        assert_eq!(self.bias_weights.len(), self.error.len(), "bias shape mismatch");
        assert_eq!(
            self.weights.len(),
            self.error.len() * self.input.len(),
            "weights shape mismatch"
        );
    }
}

/// Error signal of neuron `gid` in a hidden layer.
///
/// The next layer's weights are stored by destination neuron, so the weight from
/// `gid` into `next` sits at `gid + next * layer_size`.
#[inline]
pub fn neuron_error(layer: &HiddenLayer<'_>, gid: usize) -> f32 {
    let size = layer.layer_size();
    let propagated: f32 = layer
        .next_error
        .iter()
        .enumerate()
        .map(|(next, err)| layer.next_weights[gid + next * size] * err)
        .sum();
    propagated * activation::derivative(layer.af_type, layer.weighted_sum[gid])
}

/// Applies one neuron's online update to its weight row and bias.
#[inline]
pub fn update_neuron(row: &mut [f32], bias: &mut f32, error: f32, input: &[f32], learning_rate: f32) {
    for (w, x) in row.iter_mut().zip(input) {
        *w += error * x * learning_rate;
    }
    *bias += error * learning_rate;
}
