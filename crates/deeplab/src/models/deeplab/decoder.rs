//! # `DeepLabV3+` Decoder
//!
//! Fuses the ASPP output with the backbone's low-level features:
//! ```text
//!   reduce:      1x1 conv/norm/act on low-level   low_level_in -> low_level_channels
//!   upsample:    bilinear, ASPP output -> low-level resolution
//!   concat:      [upsampled, reduced]
//!   refine:      2x 3x3 conv/norm/act             -> decoder_channels
//!   classifier:  1x1 conv with bias               -> num_classes
//! ```

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::conv_norm_act::{ConvNormAct2d, ConvNormAct2dConfig, ConvNormAct2dMeta};
use crate::models::deeplab::resize_bilinear;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// [`Decoder`] Config.
#[derive(Config, Debug)]
pub struct DecoderConfig {
    /// Channels of the ASPP output.
    pub high_channels: usize,

    /// Channels of the backbone low-level features.
    pub low_level_in: usize,

    /// Channels after reducing the low-level features.
    #[config(default = 48)]
    pub low_level_channels: usize,

    /// Channels of the refinement convolutions.
    #[config(default = 64)]
    pub decoder_channels: usize,

    /// Number of output classes.
    pub num_classes: usize,

    /// Normalization policy.
    #[config(default = "Some(NormalizationConfig::default_batch())")]
    pub norm: Option<NormalizationConfig>,

    /// Activation policy.
    #[config(default = "ActivationConfig::Relu6")]
    pub act: ActivationConfig,
}

impl DecoderConfig {
    /// Initialize a [`Decoder`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Decoder<B> {
        let norm = self.norm.clone();
        let act = Some(self.act.clone());

        Decoder {
            reduce: ConvNormAct2dConfig::pointwise(self.low_level_in, self.low_level_channels)
                .with_policy(norm.clone(), act.clone())
                .init(device),
            refine: vec![
                ConvNormAct2dConfig::new(
                    self.high_channels + self.low_level_channels,
                    self.decoder_channels,
                    3,
                )
                .with_policy(norm.clone(), act.clone())
                .init(device),
                ConvNormAct2dConfig::new(self.decoder_channels, self.decoder_channels, 3)
                    .with_policy(norm, act)
                    .init(device),
            ],
            classifier: ConvNormAct2dConfig::pointwise(self.decoder_channels, self.num_classes)
                .with_policy(None, None)
                .with_bias(true)
                .init(device),
        }
    }
}

/// `DeepLabV3+` decoder.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    /// Low-level channel reduction.
    pub reduce: ConvNormAct2d<B>,

    /// Refinement convolutions.
    pub refine: Vec<ConvNormAct2d<B>>,

    /// Per-pixel classifier; no norm, no activation.
    pub classifier: ConvNormAct2d<B>,
}

impl<B: Backend> Decoder<B> {
    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.classifier.out_channels()
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `high`: ``[batch, high_channels, high_height, high_width]``.
    /// - `low_level`: ``[batch, low_level_in, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes, height, width]`` logits.
    pub fn forward(
        &self,
        high: Tensor<B, 4>,
        low_level: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "low_level_in", "height", "width"],
            &low_level,
            &["batch", "height", "width"],
            &[("low_level_in", self.reduce.in_channels())],
        );

        let low_level = self.reduce.forward(low_level);
        let high = resize_bilinear(high, [height, width]);

        let x = Tensor::cat(vec![high, low_level], 1);
        let x = self.refine.iter().fold(x, |x, layer| layer.forward(x));
        let x = self.classifier.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "num_classes", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("num_classes", self.num_classes()),
                ("height", height),
                ("width", width)
            ],
        );

        x
    }
}
