//! Error types for training runs.

use briny::prelude::ValidationError;
use rayon::ThreadPoolBuildError;

use crate::network::NetworkError;

/// Result type for training operations.
pub type Result<T> = std::result::Result<T, TrainError>;

/// Errors that abort a training run.
///
/// A run that fails keeps every update committed before the failing row.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    /// Forward evaluation rejected the network or its input.
    #[error("forward evaluation failed: {0}")]
    Network(#[from] NetworkError),

    /// The data set's rows do not match its declared widths.
    #[error("invalid data set: a row does not match the declared widths")]
    InvalidDataSet,

    /// A row's expected output does not match the output layer.
    #[error("row {row}: expected output has {actual} values, output layer has {expected}")]
    OutputSize {
        row: usize,
        expected: usize,
        actual: usize,
    },

    /// A layer's state does not match its neighbours.
    #[error("layer {layer}: {what} holds {actual} values, expected {expected}")]
    LayerShape {
        layer: usize,
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The CPU worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] ThreadPoolBuildError),
}

impl From<ValidationError> for TrainError {
    fn from(_: ValidationError) -> Self {
        Self::InvalidDataSet
    }
}
