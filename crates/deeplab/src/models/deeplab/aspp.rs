//! # Atrous Spatial Pyramid Pooling
//!
//! [`Aspp`] runs parallel branches over the high-level feature map:
//! ```text
//!   pointwise:  1x1 conv/norm/act
//!   atrous[r]:  3x3 conv/norm/act, dilation=r; one per rate
//!   image:      global avg pool -> 1x1 conv/norm/act -> upsample
//!   project:    concat(branches) -> 1x1 conv/norm/act
//! ```
//!
//! Every branch emits `out_channels`; the output resolution equals the
//! input resolution.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::conv_norm_act::{ConvNormAct2d, ConvNormAct2dConfig, ConvNormAct2dMeta};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::prelude::{Backend, Tensor};

/// Default atrous branch rates.
pub const DEFAULT_ASPP_RATES: [usize; 3] = [6, 12, 18];

/// [`Aspp`] Meta.
pub trait AsppMeta {
    /// Input feature channels.
    fn in_channels(&self) -> usize;

    /// Channels of every branch, and of the output.
    fn out_channels(&self) -> usize;

    /// Dilation rates of the atrous branches.
    fn rates(&self) -> Vec<usize>;

    /// Total number of concatenated branches.
    fn num_branches(&self) -> usize {
        self.rates().len() + 2
    }
}

/// [`Aspp`] Config.
#[derive(Config, Debug)]
pub struct AsppConfig {
    /// Input feature channels.
    pub in_channels: usize,

    /// Branch and output channels.
    #[config(default = 128)]
    pub out_channels: usize,

    /// Atrous branch dilation rates.
    #[config(default = "DEFAULT_ASPP_RATES.to_vec()")]
    pub rates: Vec<usize>,

    /// Normalization policy.
    #[config(default = "Some(NormalizationConfig::default_batch())")]
    pub norm: Option<NormalizationConfig>,

    /// Activation policy.
    #[config(default = "ActivationConfig::Relu6")]
    pub act: ActivationConfig,
}

impl AsppMeta for AsppConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn rates(&self) -> Vec<usize> {
        self.rates.clone()
    }
}

impl AsppConfig {
    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.rates.iter().any(|&r| r == 0) {
            return Err(format!("ASPP rates must be positive: {:?}", self.rates));
        }
        Ok(())
    }

    /// Initialize an [`Aspp`] module.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Aspp<B> {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }

        let cna = |in_channels: usize, kernel_size: usize| {
            ConvNormAct2dConfig::new(in_channels, self.out_channels, kernel_size)
                .with_policy(self.norm.clone(), Some(self.act.clone()))
        };

        Aspp {
            pointwise: cna(self.in_channels, 1).init(device),
            atrous: self
                .rates
                .iter()
                .map(|&rate| cna(self.in_channels, 3).with_dilation(rate).init(device))
                .collect(),
            image_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            image_proj: cna(self.in_channels, 1).init(device),
            project: cna(self.out_channels * self.num_branches(), 1).init(device),
        }
    }
}

/// Atrous spatial pyramid pooling.
#[derive(Module, Debug)]
pub struct Aspp<B: Backend> {
    /// `1x1` branch.
    pub pointwise: ConvNormAct2d<B>,

    /// Dilated `3x3` branches.
    pub atrous: Vec<ConvNormAct2d<B>>,

    /// Image-level pooling.
    pub image_pool: AdaptiveAvgPool2d,

    /// Image-level projection.
    pub image_proj: ConvNormAct2d<B>,

    /// Output projection over the concatenated branches.
    pub project: ConvNormAct2d<B>,
}

impl<B: Backend> AsppMeta for Aspp<B> {
    fn in_channels(&self) -> usize {
        self.pointwise.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.project.out_channels()
    }

    fn rates(&self) -> Vec<usize> {
        self.atrous.iter().map(|branch| branch.dilation()).collect()
    }
}

impl<B: Backend> Aspp<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, height, width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("in_channels", self.in_channels())],
        );

        let mut branches = Vec::with_capacity(self.atrous.len() + 2);
        branches.push(self.pointwise.forward(input.clone()));
        for branch in &self.atrous {
            branches.push(branch.forward(input.clone()));
        }

        // Bilinear upsampling of a 1x1 map is a broadcast.
        let image = self.image_proj.forward(self.image_pool.forward(input));
        branches.push(image.repeat_dim(2, height).repeat_dim(3, width));

        let x = self.project.forward(Tensor::cat(branches, 1));

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("height", height),
                ("width", width)
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
    fn test_aspp_config() {
        let config = AsppConfig::new(2048);
        assert_eq!(config.in_channels(), 2048);
        assert_eq!(config.out_channels(), 128);
        assert_eq!(config.rates(), vec![6, 12, 18]);
        assert_eq!(config.num_branches(), 5);

        assert!(config.with_rates(vec![1, 0]).try_validate().is_err());
    }

    #[test]
    fn test_aspp_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let aspp: Aspp<B> = AsppConfig::new(16)
            .with_out_channels(8)
            .with_rates(vec![2, 4])
            .init(&device);

        assert_eq!(aspp.rates(), vec![2, 4]);
        assert_eq!(aspp.num_branches(), 4);
        assert_eq!(aspp.project.in_channels(), 32);

        for [height, width] in [[5, 5], [3, 7]] {
            let input = Tensor::random([2, 16, height, width], Distribution::Default, &device);
            let output = aspp.forward(input);

            assert_shape_contract!(
                ["batch", "channels", "height", "width"],
                &output,
                &[
                    ("batch", 2),
                    ("channels", 8),
                    ("height", height),
                    ("width", width)
                ],
            );
        }
    }

    #[test]
    fn test_default_rates_on_small_features() {
        type B = NdArray<f32>;
        let device = Default::default();

        // rates 6, 12 and 18 all reach past an 8x8 feature map.
        let aspp: Aspp<B> = AsppConfig::new(64).with_out_channels(16).init(&device);

        for [height, width] in [[8, 8], [2, 3], [1, 1]] {
            let input = Tensor::random([2, 64, height, width], Distribution::Default, &device);
            let output = aspp.forward(input);
            assert_eq!(output.dims(), [2, 16, height, width]);
        }
    }
}
