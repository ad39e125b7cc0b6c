//! # `Dense` - fully-connected layer.
//!
//! Projects the last (feature) dimension of its input to `d_output`
//! through a learned weight matrix, with an optional learned bias.
//! No activation is applied; callers compose one if needed.

use crate::layers::conv_norm_act::DEFAULT_FILTER_INITIALIZER;
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};

/// [`Dense`] Meta.
pub trait DenseMeta {
    /// Input feature width.
    fn d_input(&self) -> usize;

    /// Output feature width.
    fn d_output(&self) -> usize;

    /// Does the layer add a bias?
    fn has_bias(&self) -> bool;
}

/// [`Dense`] Config.
#[derive(Config, Debug)]
pub struct DenseConfig {
    /// Input feature width.
    pub d_input: usize,

    /// Output feature width.
    pub d_output: usize,

    /// Add a learned bias.
    #[config(default = true)]
    pub bias: bool,

    /// Weight (and bias) initializer.
    #[config(default = "DEFAULT_FILTER_INITIALIZER")]
    pub initializer: Initializer,
}

impl DenseMeta for DenseConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn d_output(&self) -> usize {
        self.d_output
    }

    fn has_bias(&self) -> bool {
        self.bias
    }
}

impl DenseConfig {
    /// Initialize a [`Dense`] layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Dense<B> {
        Dense {
            linear: LinearConfig::new(self.d_input, self.d_output)
                .with_bias(self.bias)
                .with_initializer(self.initializer.clone())
                .init(device),
        }
    }
}

/// Fully-connected layer.
#[derive(Module, Debug)]
pub struct Dense<B: Backend> {
    /// Wrapped linear layer.
    pub linear: Linear<B>,
}

impl<B: Backend> DenseMeta for Dense<B> {
    fn d_input(&self) -> usize {
        self.linear.weight.shape().dims[0]
    }

    fn d_output(&self) -> usize {
        self.linear.weight.shape().dims[1]
    }

    fn has_bias(&self) -> bool {
        self.linear.bias.is_some()
    }
}

impl<B: Backend> Dense<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[..., d_input]``.
    ///
    /// # Returns
    ///
    /// ``[..., d_output]``
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        self.linear.forward(input)
    }
}
