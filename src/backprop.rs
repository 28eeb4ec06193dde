//! Online backpropagation.
//!
//! [`BackPropagation`] trains a [`Network`] one row at a time:
//!
//! 1. forward pass (`set_input` + `calculate`, owned by the network),
//! 2. output-layer error, always on the host,
//! 3. hidden-layer errors from the last hidden layer back to layer 0,
//! 4. weight updates from layer 0 to the output layer.
//!
//! Steps 3 and 4 go through the configured [`Kernels`]. Every kernel call blocks
//! until its whole layer is done, so each step sees the complete result of the
//! one before it. All errors of a row are computed before any weight moves.
//!
//! Epochs repeat until the summed output error of an epoch is at most
//! `max_error`, or the iteration cap is reached. At least one epoch always runs.
//!
//! # Example
//! ```
//! use backprop_kernels::activation::Activation;
//! use backprop_kernels::backprop::BackPropagation;
//! use backprop_kernels::dataset::{DataSet, Row};
//! use backprop_kernels::learning::LearningRule;
//! use backprop_kernels::network::FeedForward;
//!
//! let mut net = FeedForward::builder(1)
//!     .layer(1, Activation::Sigmoid)
//!     .build();
//! let data = DataSet::from_rows(1, 1, vec![Row::new(vec![1.0], vec![1.0])]).unwrap();
//!
//! let mut trainer = BackPropagation::new(0.5).unwrap().with_max_iterations(10);
//! trainer.learn(&mut net, &data).unwrap();
//! assert!(trainer.iteration() <= 10);
//! ```

use core::cmp::Ordering;

use briny::prelude::*;
use tracing::{debug, info, info_span, warn};

use crate::activation;
use crate::backend::{self, ThreadingType};
use crate::dataset::DataSet;
use crate::error::{Result, TrainError};
use crate::learning::LearningRule;
use crate::network::{Layer, Network};
use crate::ops::dispatch::{kernels_for, Kernels};
use crate::ops::{HiddenLayer, WeightUpdate};
use crate::splitter;

/// Default stopping threshold for the per-epoch error.
pub const DEFAULT_MAX_ERROR: f32 = 0.01;

/// Error signals of one row, one vector per layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorTable {
    errors: Vec<Vec<f32>>,
    row_error: f32,
}

impl ErrorTable {
    /// Error signals of layer `l`.
    ///
    /// # Panics
    /// If `l` is out of range.
    pub fn layer(&self, l: usize) -> &[f32] {
        &self.errors[l]
    }

    /// Number of layers covered.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when the table covers no layers.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Sum of `|target - output|` over the output neurons of the row.
    pub fn row_error(&self) -> f32 {
        self.row_error
    }
}

/// Output-layer error signals and the row's absolute output error.
///
/// `error[i] = (target[i] - output[i]) * f'(weighted_sum[i])`. The returned sum
/// adds up `|target[i] - output[i]|`, taken before the derivative is applied.
pub fn output_error(
    target: &[f32],
    output: &[f32],
    weighted_sum: &[f32],
    af_type: u8,
) -> (Vec<f32>, f32) {
    let mut row_error = 0.0;
    let error = target
        .iter()
        .zip(output)
        .zip(weighted_sum)
        .map(|((t, o), s)| {
            let diff = t - o;
            row_error += diff.abs();
            diff * activation::derivative(af_type, *s)
        })
        .collect();
    (error, row_error)
}

/// Gradient-descent trainer for feed-forward networks.
#[derive(Debug)]
pub struct BackPropagation {
    learning_rate: f32,
    max_error: f32,
    max_iterations: i64,
    total_error: f32,
    iteration: u64,
    threading_type: ThreadingType,
    workers: usize,
    kernels: Box<dyn Kernels>,
}

impl BackPropagation {
    /// A trainer in the process-wide default mode
    /// ([`backend::default_threading`]) with `max_error` 0.01, no iteration cap
    /// and half the available cores as CPU workers.
    ///
    /// # Errors
    /// [`TrainError::WorkerPool`] if the CPU worker pool cannot be started.
    pub fn new(learning_rate: f32) -> Result<Self> {
        let threading_type = backend::default_threading();
        let workers = splitter::default_workers();
        Ok(Self {
            learning_rate,
            max_error: DEFAULT_MAX_ERROR,
            max_iterations: -1,
            total_error: f32::INFINITY,
            iteration: 0,
            threading_type,
            workers,
            kernels: kernels_for(threading_type, workers)?,
        })
    }

    /// Builder form of [`set_max_error`](Self::set_max_error).
    pub fn with_max_error(mut self, max_error: f32) -> Self {
        self.set_max_error(max_error);
        self
    }

    /// Builder form of [`set_max_iterations`](Self::set_max_iterations).
    pub fn with_max_iterations(mut self, max_iterations: i64) -> Self {
        self.set_max_iterations(max_iterations);
        self
    }

    /// Builder form of [`set_threading_type`](Self::set_threading_type).
    ///
    /// # Errors
    /// [`TrainError::WorkerPool`] if the CPU worker pool cannot be started.
    pub fn with_threading_type(mut self, threading_type: ThreadingType) -> Result<Self> {
        self.set_threading_type(threading_type)?;
        Ok(self)
    }

    /// Builder form of [`set_workers`](Self::set_workers).
    ///
    /// # Errors
    /// [`TrainError::WorkerPool`] if the CPU worker pool cannot be started.
    pub fn with_workers(mut self, workers: usize) -> Result<Self> {
        self.set_workers(workers)?;
        Ok(self)
    }

    /// Sets the epoch error at or below which training stops.
    pub fn set_max_error(&mut self, max_error: f32) {
        self.max_error = max_error;
    }

    /// Caps the number of epochs; a negative value removes the cap.
    pub fn set_max_iterations(&mut self, max_iterations: i64) {
        self.max_iterations = max_iterations;
    }

    /// Switches between CPU and GPU kernels, rebuilding them.
    ///
    /// # Errors
    /// [`TrainError::WorkerPool`] if the CPU worker pool cannot be started; the
    /// previous kernels stay in place.
    pub fn set_threading_type(&mut self, threading_type: ThreadingType) -> Result<()> {
        self.kernels = kernels_for(threading_type, self.workers)?;
        self.threading_type = threading_type;
        debug!(mode = %threading_type, workers = self.workers, "kernels rebuilt");
        Ok(())
    }

    /// Sets the CPU worker count, clamped to at least one.
    ///
    /// # Errors
    /// [`TrainError::WorkerPool`] if the CPU worker pool cannot be started.
    pub fn set_workers(&mut self, workers: usize) -> Result<()> {
        let workers = workers.max(1);
        self.kernels = kernels_for(self.threading_type, workers)?;
        self.workers = workers;
        Ok(())
    }

    /// Stopping threshold for the epoch error.
    pub fn max_error(&self) -> f32 {
        self.max_error
    }

    /// Epoch cap; negative means unlimited.
    pub fn max_iterations(&self) -> i64 {
        self.max_iterations
    }

    /// Summed output error of the last completed epoch; infinite before the
    /// first one.
    pub fn total_error(&self) -> f32 {
        self.total_error
    }

    /// Epochs completed by the current or last call to `learn`.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Mode the current kernels run in.
    pub fn threading_type(&self) -> ThreadingType {
        self.threading_type
    }

    /// CPU worker count used when the mode is [`ThreadingType::Cpu`].
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Computes the error table of the row whose forward pass `network` holds.
    ///
    /// # Errors
    /// [`TrainError::OutputSize`] or [`TrainError::LayerShape`] if `target` or
    /// the layers are inconsistent; nothing is computed in that case.
    pub fn backward<N: Network>(&self, network: &N, target: &[f32]) -> Result<ErrorTable> {
        check_shapes(network, target.len(), 0)?;
        Ok(self.error_table(network.layers(), target))
    }

    fn error_table<L: Layer>(&self, layers: &[L], target: &[f32]) -> ErrorTable {
        let mut errors = vec![Vec::new(); layers.len()];
        let Some(last) = layers.len().checked_sub(1) else {
            return ErrorTable { errors, row_error: 0.0 };
        };

        let out = &layers[last];
        let (out_error, row_error) =
            output_error(target, out.output(), out.weighted_sum(), out.af_type());
        errors[last] = out_error;

        for l in (0..last).rev() {
            let error = self.kernels.layer_error(&HiddenLayer {
                weighted_sum: layers[l].weighted_sum(),
                af_type: layers[l].af_type(),
                next_weights: layers[l + 1].weights(),
                next_error: &errors[l + 1],
            });
            errors[l] = error;
        }

        ErrorTable { errors, row_error }
    }

    /// Applies the updates for one row, layer 0 first.
    ///
    /// Layer 0 learns from `input`; every later layer from the previous layer's
    /// output as left by the forward pass.
    ///
    /// # Errors
    /// [`TrainError::LayerShape`] if `table` or `input` do not fit the network,
    /// or a layer's weights do not chain to the previous layer's width. No
    /// weight moves in that case.
    pub fn apply<N: Network>(&self, network: &mut N, table: &ErrorTable, input: &[f32]) -> Result<()> {
        if input.len() != network.input_size() {
            return Err(TrainError::LayerShape {
                layer: 0,
                what: "input",
                expected: network.input_size(),
                actual: input.len(),
            });
        }
        if table.len() != network.layers().len() {
            return Err(TrainError::LayerShape {
                layer: table.len(),
                what: "error table",
                expected: network.layers().len(),
                actual: table.len(),
            });
        }
        for (l, (layer, error)) in network.layers().iter().zip(&table.errors).enumerate() {
            if error.len() != layer.layer_size() {
                return Err(TrainError::LayerShape {
                    layer: l,
                    what: "error",
                    expected: layer.layer_size(),
                    actual: error.len(),
                });
            }
        }

        let out_len = table.errors.last().map_or(0, Vec::len);
        check_shapes(network, out_len, 0)?;

        self.update_layers(network.layers_mut(), table, input);
        Ok(())
    }

    fn update_layers<L: Layer>(&self, layers: &mut [L], table: &ErrorTable, input: &[f32]) {
        for l in 0..layers.len() {
            let (done, rest) = layers.split_at_mut(l);
            let layer_input = done.last().map_or(input, |prev| prev.output());
            let (weights, bias_weights) = rest[0].params_mut();
            self.kernels.update_weights(WeightUpdate {
                weights,
                bias_weights,
                error: &table.errors[l],
                input: layer_input,
                learning_rate: self.learning_rate,
            });
        }
    }

    fn train_row<N: Network>(&self, network: &mut N, input: &[f32], target: &[f32], row: usize) -> Result<f32> {
        network.set_input(input)?;
        network.calculate()?;
        check_shapes(network, target.len(), row)?;

        let table = self.error_table(network.layers(), target);
        self.update_layers(network.layers_mut(), &table, input);
        Ok(table.row_error)
    }

    fn stop_reason(&self) -> Option<StopReason> {
        match self.total_error.partial_cmp(&self.max_error) {
            None => Some(StopReason::NotANumber),
            Some(Ordering::Less | Ordering::Equal) => Some(StopReason::Converged),
            Some(Ordering::Greater)
                if self.max_iterations >= 0 && self.iteration >= self.max_iterations as u64 =>
            {
                Some(StopReason::IterationCap)
            }
            Some(Ordering::Greater) => None,
        }
    }

    fn should_stop(&self) -> bool {
        let Some(reason) = self.stop_reason() else {
            return false;
        };
        let (iteration, total_error) = (self.iteration, self.total_error);
        match reason {
            StopReason::Converged => info!(iteration, total_error, "converged"),
            StopReason::NotANumber => warn!(iteration, "epoch error is NaN, stopping"),
            StopReason::IterationCap => info!(iteration, total_error, "iteration cap reached"),
        }
        true
    }
}

/// Why an epoch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Converged,
    /// The epoch error could not be compared with `max_error`.
    NotANumber,
    IterationCap,
}

impl LearningRule for BackPropagation {
    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    fn learn<N: Network>(&mut self, network: &mut N, data: &DataSet) -> Result<()> {
        data.validate()?;

        let span = info_span!(
            "learn",
            rows = data.len(),
            layers = network.layers().len(),
            mode = %self.threading_type,
        );
        let _enter = span.enter();

        self.iteration = 0;
        loop {
            let mut epoch_error = 0.0;
            for (index, row) in data.rows().iter().enumerate() {
                epoch_error += self.train_row(network, &row.input, &row.output, index)?;
            }
            self.total_error = epoch_error;
            self.iteration += 1;
            debug!(iteration = self.iteration, total_error = self.total_error, "epoch done");

            if self.should_stop() {
                return Ok(());
            }
        }
    }
}

/// Checks that `network`'s layers chain up and its output layer is
/// `target_len` wide. `row` only labels the error.
fn check_shapes<N: Network>(network: &N, target_len: usize, row: usize) -> Result<()> {
    let layers = network.layers();
    let mut prev = network.input_size();

    for (l, layer) in layers.iter().enumerate() {
        let size = layer.layer_size();
        let checks = [
            ("weights", size * prev, layer.weights().len()),
            ("bias weights", size, layer.bias_weights().len()),
            ("weighted sum", size, layer.weighted_sum().len()),
            ("output", size, layer.output().len()),
        ];
        if let Some(&(what, expected, actual)) = checks.iter().find(|(_, e, a)| e != a) {
            return Err(TrainError::LayerShape { layer: l, what, expected, actual });
        }
        prev = size;
    }

    if let Some(out) = layers.last() {
        if out.layer_size() != target_len {
            return Err(TrainError::OutputSize {
                row,
                expected: out.layer_size(),
                actual: target_len,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn output_error_sums_raw_differences() {
        let (error, row_error) = output_error(&[1.0, 0.0], &[0.5, 0.25], &[0.0, 0.0], 1);
        assert_abs_diff_eq!(error[0], 0.5 * 0.25, epsilon = 1e-7);
        assert_abs_diff_eq!(error[1], -0.25 * 0.25, epsilon = 1e-7);
        assert_abs_diff_eq!(row_error, 0.75, epsilon = 1e-7);
    }

    #[test]
    fn defaults() {
        let trainer = BackPropagation::new(0.1).unwrap();
        assert_eq!(trainer.max_error(), DEFAULT_MAX_ERROR);
        assert_eq!(trainer.max_iterations(), -1);
        assert!(trainer.total_error().is_infinite());
        assert_eq!(trainer.iteration(), 0);
        assert!(trainer.workers() >= 1);
    }

    #[test]
    fn switching_mode_rebuilds_kernels() {
        let mut trainer = BackPropagation::new(0.1)
            .unwrap()
            .with_threading_type(ThreadingType::Gpu)
            .unwrap();
        assert_eq!(trainer.kernels.threading_type(), ThreadingType::Gpu);
        trainer.set_threading_type(ThreadingType::Cpu).unwrap();
        assert_eq!(trainer.kernels.threading_type(), ThreadingType::Cpu);
        assert_eq!(trainer.threading_type(), ThreadingType::Cpu);
    }

    #[test]
    fn nan_error_stops_with_its_own_reason() {
        let mut trainer = BackPropagation::new(0.1).unwrap().with_max_iterations(5);
        trainer.total_error = f32::NAN;
        trainer.iteration = 5;
        assert_eq!(trainer.stop_reason(), Some(StopReason::NotANumber));
        assert!(trainer.should_stop());
    }

    #[test]
    fn stop_reasons() {
        let mut trainer = BackPropagation::new(0.1).unwrap().with_max_iterations(3);
        trainer.iteration = 1;
        trainer.total_error = 0.5;
        assert_eq!(trainer.stop_reason(), None);
        trainer.total_error = DEFAULT_MAX_ERROR;
        assert_eq!(trainer.stop_reason(), Some(StopReason::Converged));
        trainer.total_error = 0.5;
        trainer.iteration = 3;
        assert_eq!(trainer.stop_reason(), Some(StopReason::IterationCap));
    }
}
