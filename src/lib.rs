//! backprop_kernels: online backpropagation with swappable CPU and GPU kernels.
//!
//! Given a network whose forward pass has just run, the trainer derives an
//! error signal for every neuron, walks it back through the layers, and nudges
//! each weight in place, one training row at a time, until the epoch error
//! drops below a threshold or an iteration cap is hit.
//!
//! # Features
//!
//! - Per-activation derivative table for six activation kinds.
//! - A bounded worker pool that fans per-neuron work out and barriers on it.
//! - CPU and GPU implementations of the two layer kernels behind one trait.
//!
//! # Modules
//!
//! - [`activation`]: forward functions and derivative multipliers.
//! - [`splitter`]: the bounded-concurrency executor.
//! - [`ops`]: layer error and weight update kernels, CPU and GPU.
//! - [`backprop`]: the training loop.
//! - [`network`] / [`dataset`]: the collaborators training reads and writes.
//! - [`backend`]: execution mode selection.
//!
//! # Feature Flags
//!
//! - `wgpu`: run GPU-mode kernels as WGSL compute shaders through `wgpu`.
//!   Without it GPU mode evaluates the same kernels as a host batch.
//!
//! # Example
//!
//! ```rust
//! use backprop_kernels::prelude::*;
//!
//! let mut net = FeedForward::builder(2)
//!     .layer(2, Activation::Sigmoid)
//!     .layer(1, Activation::Sigmoid)
//!     .build();
//! let data = DataSet::from_rows(2, 1, vec![
//!     Row::new(vec![0.0, 1.0], vec![1.0]),
//!     Row::new(vec![1.0, 0.0], vec![0.0]),
//! ]).unwrap();
//!
//! let mut trainer = BackPropagation::new(0.3)?.with_max_iterations(50);
//! trainer.learn(&mut net, &data)?;
//! assert!(trainer.iteration() >= 1);
//! # Ok::<(), backprop_kernels::error::TrainError>(())
//! ```

pub mod activation;
pub mod backend;
pub mod backprop;
pub mod dataset;
pub mod error;
pub mod learning;
pub mod network;
pub mod ops;
pub mod splitter;

/// The types most callers need.
pub mod prelude {
    pub use crate::activation::Activation;
    pub use crate::backend::ThreadingType;
    pub use crate::backprop::BackPropagation;
    pub use crate::dataset::{DataSet, Row};
    pub use crate::error::TrainError;
    pub use crate::learning::LearningRule;
    pub use crate::network::{FeedForward, Layer, Network, NetworkError};
}
