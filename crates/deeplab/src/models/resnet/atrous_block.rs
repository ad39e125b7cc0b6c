//! # [`AtrousBlock`] - dilated bottleneck block.
//!
//! The late-stage unit of the backbone. Same three layers as
//! [`crate::models::resnet::residual_block::ResidualBlock`], but always
//! stride 1, with a dilated middle convolution:
//! ```text
//!   reduce:  1x1 conv/norm/act              in_planes -> depth
//!   conv:    3x3 conv/norm/act, dilation=r  depth     -> depth
//!   expand:  1x1 conv/norm                  depth     -> out_planes (no activation)
//!   out = act(expand + input)
//! ```
//!
//! Output resolution always equals input resolution.
//!
//! The shortcut is the unmodified input. The first block of an atrous
//! stage changes the channel count, so it carries a stride-1 `1x1`
//! projection on the shortcut; every later block is a pure identity sum.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::conv_norm_act::{ConvNormAct2d, ConvNormAct2dConfig, ConvNormAct2dMeta};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`AtrousBlock`] Meta trait.
pub trait AtrousBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The bottleneck depth of the middle convolution.
    fn depth(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// Dilation rate of the middle convolution.
    fn dilation(&self) -> usize;

    /// Does the shortcut path project the input?
    fn has_projection(&self) -> bool {
        self.in_planes() != self.out_planes()
    }

    /// The output resolution; always the input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        input_resolution
    }
}

/// [`AtrousBlock`] Config.
///
/// Implements [`AtrousBlockMeta`].
#[derive(Config, Debug)]
pub struct AtrousBlockConfig {
    /// The number of input feature planes.
    pub in_planes: usize,

    /// The bottleneck depth.
    pub depth: usize,

    /// The number of output feature planes.
    pub out_planes: usize,

    /// Dilation rate of the middle convolution.
    #[config(default = 2)]
    pub dilation: usize,

    /// [`crate::compat::normalization_wrapper::Normalization`] config.
    #[config(default = "Some(NormalizationConfig::default_batch())")]
    pub norm: Option<NormalizationConfig>,

    /// [`Activation`] config.
    #[config(default = "ActivationConfig::Relu6")]
    pub act: ActivationConfig,
}

impl AtrousBlockMeta for AtrousBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn out_planes(&self) -> usize {
        self.out_planes
    }

    fn dilation(&self) -> usize {
        self.dilation
    }
}

impl AtrousBlockConfig {
    /// Initialize an [`AtrousBlock`].
    ///
    /// # Panics
    ///
    /// If the dilation rate is zero.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> AtrousBlock<B> {
        assert!(self.dilation > 0, "dilation must be positive");

        let norm = self.norm.clone();
        let act = Some(self.act.clone());

        let projection = if self.has_projection() {
            Some(
                ConvNormAct2dConfig::pointwise(self.in_planes, self.out_planes)
                    .with_policy(norm.clone(), act.clone()),
            )
        } else {
            None
        };

        let reduce = ConvNormAct2dConfig::pointwise(self.in_planes, self.depth)
            .with_policy(norm.clone(), act.clone());

        let conv = ConvNormAct2dConfig::new(self.depth, self.depth, 3)
            .with_dilation(self.dilation)
            .with_policy(norm.clone(), act);

        let expand =
            ConvNormAct2dConfig::pointwise(self.depth, self.out_planes).with_policy(norm, None);

        AtrousBlock {
            projection: projection.map(|c| c.init(device)),
            reduce: reduce.init(device),
            conv: conv.init(device),
            expand: expand.init(device),
            act: self.act.init(device),
        }
    }
}

/// Dilated bottleneck residual block.
///
/// Implements [`AtrousBlockMeta`].
#[derive(Module, Debug)]
pub struct AtrousBlock<B: Backend> {
    /// Stride-1 channel projection; only when `in_planes != out_planes`.
    pub projection: Option<ConvNormAct2d<B>>,

    /// `1x1` channel reduction.
    pub reduce: ConvNormAct2d<B>,

    /// `3x3` dilated convolution.
    pub conv: ConvNormAct2d<B>,

    /// `1x1` channel expansion; unactivated.
    pub expand: ConvNormAct2d<B>,

    /// Post-sum activation.
    pub act: Activation<B>,
}

impl<B: Backend> AtrousBlockMeta for AtrousBlock<B> {
    fn in_planes(&self) -> usize {
        self.reduce.in_channels()
    }

    fn depth(&self) -> usize {
        self.conv.out_channels()
    }

    fn out_planes(&self) -> usize {
        self.expand.out_channels()
    }

    fn dilation(&self) -> usize {
        self.conv.dilation()
    }

    fn has_projection(&self) -> bool {
        self.projection.is_some()
    }
}

impl<B: Backend> AtrousBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, height, width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, height, width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "in_planes", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("in_planes", self.in_planes())],
        );

        let identity = match &self.projection {
            Some(projection) => projection.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.reduce.forward(input);
        let x = self.conv.forward(x);
        let x = self.expand.forward(x);

        let x = self.act.forward(x + identity);

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
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
    fn test_atrous_block_config() {
        let config = AtrousBlockConfig::new(16, 4, 16);
        assert_eq!(config.dilation(), 2);
        assert!(!config.has_projection());
        assert_eq!(config.output_resolution([13, 7]), [13, 7]);

        let config = AtrousBlockConfig {
            out_planes: 32,
            ..config.with_dilation(4)
        };
        assert_eq!(config.dilation(), 4);
        assert!(config.has_projection());
    }

    #[test]
    #[should_panic(expected = "dilation must be positive")]
    fn test_zero_dilation_panics() {
        type B = NdArray<f32>;
        let device = Default::default();
        let _block: AtrousBlock<B> = AtrousBlockConfig::new(4, 2, 4)
            .with_dilation(0)
            .init(&device);
    }

    #[test]
    fn test_atrous_block_meta() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: AtrousBlock<B> = AtrousBlockConfig::new(8, 2, 8)
            .with_dilation(4)
            .init(&device);

        assert_eq!(block.in_planes(), 8);
        assert_eq!(block.depth(), 2);
        assert_eq!(block.out_planes(), 8);
        assert_eq!(block.dilation(), 4);
        assert_eq!(block.conv.padding(), 4);
        assert_eq!(block.reduce.stride(), 1);
        assert!(!block.has_projection());
        assert!(block.expand.act.is_none());
    }

    #[test]
    fn test_preserves_resolution_for_any_dilation() {
        type B = NdArray<f32>;
        let device = Default::default();

        let batch_size = 2;
        for (in_planes, out_planes) in [(6, 6), (4, 8)] {
            for dilation in [1, 2, 3, 4, 8] {
                let block: AtrousBlock<B> = AtrousBlockConfig::new(in_planes, 2, out_planes)
                    .with_dilation(dilation)
                    .init(&device);

                for [height, width] in [[9, 9], [6, 11]] {
                    let input = Tensor::random(
                        [batch_size, in_planes, height, width],
                        Distribution::Default,
                        &device,
                    );
                    let output = block.forward(input);

                    assert_shape_contract!(
                        ["batch", "out_planes", "height", "width"],
                        &output,
                        &[
                            ("batch", batch_size),
                            ("out_planes", out_planes),
                            ("height", height),
                            ("width", width)
                        ],
                    );
                }
            }
        }
    }

    #[test]
    fn test_identity_shortcut_sum() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: AtrousBlock<B> = AtrousBlockConfig::new(4, 2, 4).init(&device);

        let input = Tensor::random([1, 4, 6, 6], Distribution::Default, &device);
        let output = block.forward(input.clone());

        let expected = {
            let x = block.reduce.forward(input.clone());
            let x = block.conv.forward(x);
            let x = block.expand.forward(x);
            block.act.forward(x + input)
        };
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
