//! The learning-rule abstraction trainers implement.

use crate::dataset::DataSet;
use crate::error::Result;
use crate::network::Network;

/// A rule that adjusts a network's parameters from labeled data.
pub trait LearningRule {
    /// Step size applied to every parameter update.
    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, learning_rate: f32);

    /// Trains `network` on `data` until the rule's stopping condition holds.
    ///
    /// The network is only borrowed for the duration of the call.
    ///
    /// # Errors
    /// Any error aborts the run; updates made for earlier rows are kept.
    fn learn<N: Network>(&mut self, network: &mut N, data: &DataSet) -> Result<()>;
}
