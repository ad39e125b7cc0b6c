//! # Input Stem
//!
//! The backbone input stem:
//! ```text
//!   cna:   7x7 conv/norm/act, stride 2   in_channels -> stem_width
//!   pool:  3x3 max pool, stride 2, padding 1
//! ```
//!
//! Output resolution is ``ceil(ceil(in / 2) / 2)``.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::conv_norm_act::{ConvNormAct2d, ConvNormAct2dConfig, ConvNormAct2dMeta};
use crate::layers::conv_shape::expect_conv2d_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Tensor};

/// Stem max-pool kernel size.
pub const STEM_POOL_KERNEL: usize = 3;

/// Stem max-pool stride.
pub const STEM_POOL_STRIDE: usize = 2;

/// [`ResNetStem`] Meta.
pub trait ResNetStemMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Total stride of the stem; the conv stride times the pool stride.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2];
}

/// [`ResNetStem`] Config.
#[derive(Config, Debug)]
pub struct ResNetStemConfig {
    /// The input conv/norm/act layer.
    pub cna: ConvNormAct2dConfig,
}

impl ResNetStemConfig {
    /// Build the standard ``7x7/2`` stem.
    pub fn standard(
        in_channels: usize,
        stem_width: usize,
        norm: Option<NormalizationConfig>,
        act: ActivationConfig,
    ) -> Self {
        Self::new(
            ConvNormAct2dConfig::new(in_channels, stem_width, 7)
                .with_stride(2)
                .with_policy(norm, Some(act)),
        )
    }

    fn pool_config() -> MaxPool2dConfig {
        MaxPool2dConfig::new([STEM_POOL_KERNEL, STEM_POOL_KERNEL])
            .with_strides([STEM_POOL_STRIDE, STEM_POOL_STRIDE])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
    }

    /// Initialize a [`ResNetStem`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNetStem<B> {
        ResNetStem {
            cna: self.cna.init(device),
            pool: Self::pool_config().init(),
        }
    }
}

fn pool_output_resolution(input_resolution: [usize; 2]) -> [usize; 2] {
    expect_conv2d_output_resolution(input_resolution, STEM_POOL_KERNEL, STEM_POOL_STRIDE, 1, 1)
}

impl ResNetStemMeta for ResNetStemConfig {
    fn in_channels(&self) -> usize {
        self.cna.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.cna.out_channels()
    }

    fn stride(&self) -> usize {
        self.cna.stride() * STEM_POOL_STRIDE
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        pool_output_resolution(self.cna.output_resolution(input_resolution))
    }
}

/// Input stem.
#[derive(Module, Debug)]
pub struct ResNetStem<B: Backend> {
    /// The input convolution.
    pub cna: ConvNormAct2d<B>,

    /// The pooling.
    pub pool: MaxPool2d,
}

impl<B: Backend> ResNetStemMeta for ResNetStem<B> {
    fn in_channels(&self) -> usize {
        self.cna.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.cna.out_channels()
    }

    fn stride(&self) -> usize {
        self.cna.stride() * STEM_POOL_STRIDE
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        pool_output_resolution(self.cna.output_resolution(input_resolution))
    }
}

impl<B: Backend> ResNetStem<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())],
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let x = self.cna.forward(input);
        let x = self.pool.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_stem_config() {
        let config = ResNetStemConfig::standard(
            3,
            64,
            Some(NormalizationConfig::default_batch()),
            ActivationConfig::Relu6,
        );
        assert_eq!(config.in_channels(), 3);
        assert_eq!(config.out_channels(), 64);
        assert_eq!(config.stride(), 4);
        assert_eq!(config.cna.kernel_size(), 7);
        assert_eq!(config.cna.padding(), 3);

        assert_eq!(config.output_resolution([224, 224]), [56, 56]);
        assert_eq!(config.output_resolution([30, 17]), [8, 5]);
    }

    #[test]
    fn test_stem_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let stem: ResNetStem<B> = ResNetStemConfig::standard(
            3,
            64,
            Some(NormalizationConfig::default_batch()),
            ActivationConfig::Relu6,
        )
        .init(&device);

        for [height, width] in [[32, 32], [30, 17]] {
            let input = Tensor::random([2, 3, height, width], Distribution::Default, &device);
            let output = stem.forward(input);

            assert_shape_contract!(
                ["batch", "channels", "height", "width"],
                &output,
                &[
                    ("batch", 2),
                    ("channels", 64),
                    ("height", height.div_ceil(4)),
                    ("width", width.div_ceil(4))
                ],
            );
        }
    }

    #[test]
    fn test_stride_follows_conv_stride() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = ResNetStemConfig::new(ConvNormAct2dConfig::new(3, 8, 3));
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([16, 10]), [8, 5]);

        let stem: ResNetStem<B> = config.init(&device);
        assert_eq!(stem.stride(), 2);

        let output = stem.forward(Tensor::random([1, 3, 16, 10], Distribution::Default, &device));
        assert_eq!(output.dims(), [1, 8, 8, 5]);

        let config = ResNetStemConfig::new(ConvNormAct2dConfig::new(3, 8, 3).with_stride(4));
        assert_eq!(config.stride(), 8);
        assert_eq!(config.output_resolution([16, 16]), [2, 2]);
    }
}
