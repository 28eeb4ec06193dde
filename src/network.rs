//! The forward-evaluation side the trainer works against.
//!
//! Training only needs a narrow view of a network: per-layer sizes, the
//! flattened weights and biases it may update, and the weighted sums and
//! outputs the last forward pass left behind. That view is the [`Network`] and
//! [`Layer`] traits. [`FeedForward`] is a plain dense implementation of both.
//!
//! # Weight layout
//!
//! Weights are flattened row-major by destination neuron:
//! `weights[neuron * prev_size + prev]` connects input `prev` to `neuron`.

use crate::activation;

/// Faults raised by forward evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// The network has no layers.
    #[error("neural network has no layers")]
    EmptyNetwork,
    /// Layer 0 cannot take the network input.
    #[error("first layer is not an input layer")]
    NoInputLayer,
    /// The input vector does not match the first layer's fan-in.
    #[error("input has {actual} values, network expects {expected}")]
    InputSize { expected: usize, actual: usize },
}

/// Per-layer state read and written by training.
pub trait Layer {
    /// Number of neurons.
    fn layer_size(&self) -> usize;
    /// Flattened weights, `layer_size * prev_size` long.
    fn weights(&self) -> &[f32];
    /// One bias weight per neuron.
    fn bias_weights(&self) -> &[f32];
    /// Pre-activation values from the last forward pass.
    fn weighted_sum(&self) -> &[f32];
    /// Post-activation values from the last forward pass.
    fn output(&self) -> &[f32];
    /// Activation code, see [`activation`](crate::activation).
    fn af_type(&self) -> u8;
    /// Weights and bias weights, borrowed together for an in-place update.
    fn params_mut(&mut self) -> (&mut [f32], &mut [f32]);
}

/// An ordered stack of layers with a forward pass.
///
/// Index 0 is the first layer fed by the input, the last index is the output
/// layer.
pub trait Network {
    type Layer: Layer;

    /// Layers in evaluation order.
    fn layers(&self) -> &[Self::Layer];
    /// Mutable access to the layers, for in-place weight updates.
    fn layers_mut(&mut self) -> &mut [Self::Layer];

    /// Width of the input vector the first layer consumes.
    fn input_size(&self) -> usize;

    /// Stores the input for the next [`calculate`](Network::calculate).
    ///
    /// # Errors
    /// [`NetworkError::InputSize`] when `input` has the wrong width.
    fn set_input(&mut self, input: &[f32]) -> Result<(), NetworkError>;

    /// Runs the forward pass, refreshing every layer's weighted sums and outputs.
    ///
    /// # Errors
    /// [`NetworkError::EmptyNetwork`] or [`NetworkError::NoInputLayer`] on a
    /// misconfigured network.
    fn calculate(&mut self) -> Result<(), NetworkError>;
}

/// Whether a layer may sit first in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRole {
    /// First layer, fed by the network input.
    Input,
    /// Any later layer.
    Hidden,
}

/// A fully connected layer.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLayer {
    role: LayerRole,
    prev_size: usize,
    af_type: u8,
    weights: Vec<f32>,
    bias_weights: Vec<f32>,
    weighted_sum: Vec<f32>,
    output: Vec<f32>,
}

impl DenseLayer {
    /// A zero-initialised layer of `size` neurons fed by `prev_size` values.
    pub fn new(role: LayerRole, prev_size: usize, size: usize, af_type: impl Into<u8>) -> Self {
        Self {
            role,
            prev_size,
            af_type: af_type.into(),
            weights: vec![0.0; size * prev_size],
            bias_weights: vec![0.0; size],
            weighted_sum: vec![0.0; size],
            output: vec![0.0; size],
        }
    }

    /// Replaces the parameters.
    ///
    /// # Panics
    /// If `weights` is not `size * prev_size` long or `bias_weights` is not
    /// `size` long.
    pub fn with_params(mut self, weights: Vec<f32>, bias_weights: Vec<f32>) -> Self {
        assert_eq!(weights.len(), self.weights.len(), "weights shape mismatch");
        assert_eq!(bias_weights.len(), self.bias_weights.len(), "bias shape mismatch");
        self.weights = weights;
        self.bias_weights = bias_weights;
        self
    }

    /// Whether this layer may take the network input.
    pub fn role(&self) -> LayerRole {
        self.role
    }

    /// Fan-in of every neuron.
    pub fn prev_size(&self) -> usize {
        self.prev_size
    }

    fn forward(&mut self, input: &[f32]) {
        let prev = self.prev_size;
        for (gid, (sum, out)) in self
            .weighted_sum
            .iter_mut()
            .zip(self.output.iter_mut())
            .enumerate()
        {
            let row = &self.weights[gid * prev..(gid + 1) * prev];
            let s = self.bias_weights[gid]
                + row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>();
            *sum = s;
            *out = activation::activate(self.af_type, s);
        }
    }
}

impl Layer for DenseLayer {
    fn layer_size(&self) -> usize {
        self.bias_weights.len()
    }

    fn weights(&self) -> &[f32] {
        &self.weights
    }

    fn bias_weights(&self) -> &[f32] {
        &self.bias_weights
    }

    fn weighted_sum(&self) -> &[f32] {
        &self.weighted_sum
    }

    fn output(&self) -> &[f32] {
        &self.output
    }

    fn af_type(&self) -> u8 {
        self.af_type
    }

    fn params_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.weights, &mut self.bias_weights)
    }
}

/// A dense feed-forward network.
///
/// # Example
/// ```
/// use backprop_kernels::activation::Activation;
/// use backprop_kernels::network::{FeedForward, Layer, Network};
///
/// let mut net = FeedForward::builder(2)
///     .layer(3, Activation::Sigmoid)
///     .layer(1, Activation::Sigmoid)
///     .build();
/// net.set_input(&[1.0, 0.0]).unwrap();
/// net.calculate().unwrap();
/// assert_eq!(net.layers()[1].output(), &[0.5]);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedForward {
    layers: Vec<DenseLayer>,
    input: Vec<f32>,
}

impl FeedForward {
    /// Wraps existing layers without checking them; misconfiguration surfaces
    /// from [`calculate`](Network::calculate).
    pub fn from_layers(layers: Vec<DenseLayer>) -> Self {
        Self { layers, input: Vec::new() }
    }

    /// Starts a builder for a network fed by `inputs` values.
    pub fn builder(inputs: usize) -> FeedForwardBuilder {
        FeedForwardBuilder { inputs, layers: Vec::new() }
    }

    /// The output layer's activations, empty for an empty network.
    pub fn output(&self) -> &[f32] {
        self.layers.last().map(|l| l.output.as_slice()).unwrap_or_default()
    }
}

impl Network for FeedForward {
    type Layer = DenseLayer;

    fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    fn layers_mut(&mut self) -> &mut [DenseLayer] {
        &mut self.layers
    }

    fn input_size(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::prev_size)
    }

    fn set_input(&mut self, input: &[f32]) -> Result<(), NetworkError> {
        if let Some(first) = self.layers.first() {
            if first.prev_size != input.len() {
                return Err(NetworkError::InputSize {
                    expected: first.prev_size,
                    actual: input.len(),
                });
            }
        }
        self.input.clear();
        self.input.extend_from_slice(input);
        Ok(())
    }

    fn calculate(&mut self) -> Result<(), NetworkError> {
        let first = self.layers.first().ok_or(NetworkError::EmptyNetwork)?;
        if first.role != LayerRole::Input {
            return Err(NetworkError::NoInputLayer);
        }
        if first.prev_size != self.input.len() {
            return Err(NetworkError::InputSize {
                expected: first.prev_size,
                actual: self.input.len(),
            });
        }

        self.layers[0].forward(&self.input);
        for l in 1..self.layers.len() {
            let (done, rest) = self.layers.split_at_mut(l);
            rest[0].forward(&done[l - 1].output);
        }
        Ok(())
    }
}

/// Stacks dense layers, wiring each one's fan-in to the previous width.
#[derive(Debug)]
pub struct FeedForwardBuilder {
    inputs: usize,
    layers: Vec<DenseLayer>,
}

impl FeedForwardBuilder {
    /// Appends a zero-initialised layer of `size` neurons; the first one is the input layer.
    pub fn layer(mut self, size: usize, af_type: impl Into<u8>) -> Self {
        let (role, prev) = match self.layers.last() {
            Some(last) => (LayerRole::Hidden, last.layer_size()),
            None => (LayerRole::Input, self.inputs),
        };
        self.layers.push(DenseLayer::new(role, prev, size, af_type));
        self
    }

    /// Sets the parameters of the most recently added layer.
    ///
    /// # Panics
    /// If no layer was added yet or the shapes do not match.
    pub fn params(mut self, weights: Vec<f32>, bias_weights: Vec<f32>) -> Self {
        let last = self.layers.pop().expect("params() called before layer()");
        self.layers.push(last.with_params(weights, bias_weights));
        self
    }

    /// Finishes the network.
    pub fn build(self) -> FeedForward {
        FeedForward::from_layers(self.layers)
    }
}
