//! # `DeepLabV3+` Model
//!
//! [`DeepLabV3Plus`] composes:
//! * a headless dilated [`ResNetBackbone`],
//! * an image-level classification head over the pooled high-level features,
//! * an [`Aspp`] over the high-level features,
//! * a [`Decoder`] fusing the ASPP output with the low-level features.
//!
//! Both outputs are produced from one backbone pass:
//! * `classification`: ``[batch, num_classes]`` logits.
//! * `segmentation`: ``[batch, num_classes, height, width]`` logits, at the
//!   input resolution.

use crate::layers::dense::{Dense, DenseConfig};
use crate::models::deeplab::aspp::{Aspp, AsppConfig, DEFAULT_ASPP_RATES};
use crate::models::deeplab::decoder::{Decoder, DecoderConfig};
use crate::models::deeplab::resize_bilinear;
use crate::models::resnet::backbone::{
    ResNetBackbone, ResNetBackboneContractConfig, ResNetBackboneMeta,
};
use crate::models::resnet::prefabs::PREFAB_BACKBONE_MAP;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// [`DeepLabV3Plus`] Config.
#[derive(Config, Debug)]
pub struct DeepLabV3PlusConfig {
    /// Number of classes; both heads.
    pub num_classes: usize,

    /// The backbone; its own `dense_out` is ignored.
    pub backbone: ResNetBackboneContractConfig,

    /// ASPP branch and output channels.
    #[config(default = 128)]
    pub aspp_channels: usize,

    /// Decoder refinement channels.
    #[config(default = 64)]
    pub decoder_channels: usize,

    /// Channels of the reduced low-level features.
    #[config(default = 48)]
    pub low_level_channels: usize,

    /// ASPP dilation rates.
    #[config(default = "DEFAULT_ASPP_RATES.to_vec()")]
    pub aspp_rates: Vec<usize>,
}

impl DeepLabV3PlusConfig {
    /// `DeepLabV3+` on a dilated ResNet-50.
    pub fn resnet_50(num_classes: usize) -> Self {
        Self::new(num_classes, ResNetBackboneContractConfig::resnet_50(0))
    }

    /// `DeepLabV3+` on a dilated ResNet-101.
    pub fn resnet_101(num_classes: usize) -> Self {
        Self::new(num_classes, ResNetBackboneContractConfig::resnet_101(0))
    }

    /// `DeepLabV3+` on a named backbone prefab.
    ///
    /// # Returns
    ///
    /// An error when the prefab name is unknown.
    pub fn from_prefab(
        name: &str,
        num_classes: usize,
    ) -> anyhow::Result<Self> {
        let prefab = PREFAB_BACKBONE_MAP.expect_lookup(name)?;
        Ok(Self::new(num_classes, prefab.new_config()))
    }

    /// The headless backbone config.
    pub fn backbone_config(&self) -> ResNetBackboneContractConfig {
        self.backbone.clone().with_dense_out(0)
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.num_classes == 0 {
            return Err("num_classes must be positive".to_string());
        }
        if self.aspp_channels == 0 || self.decoder_channels == 0 || self.low_level_channels == 0 {
            return Err(format!(
                "head widths must be positive: aspp_channels={}, decoder_channels={}, low_level_channels={}",
                self.aspp_channels, self.decoder_channels, self.low_level_channels
            ));
        }
        self.backbone_config().try_validate()
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err)
        }
    }

    /// The high-level feature resolution for an input resolution.
    pub fn feature_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.backbone_config().output_resolution(input_resolution)
    }

    /// The ``(classification, segmentation)`` output shapes for an input shape.
    ///
    /// # Arguments
    ///
    /// - `input_shape`: ``[batch, channels, height, width]``.
    pub fn output_shapes(
        &self,
        input_shape: [usize; 4],
    ) -> ([usize; 2], [usize; 4]) {
        let [batch, _, height, width] = input_shape;
        (
            [batch, self.num_classes],
            [batch, self.num_classes, height, width],
        )
    }

    /// Initialize a [`DeepLabV3Plus`] model.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> DeepLabV3Plus<B> {
        self.expect_valid();

        let backbone_config = self.backbone_config();
        let backbone: ResNetBackbone<B> = backbone_config.to_structure().init(device);

        let norm = backbone_config.norm.clone();
        let act = backbone_config.act.clone();

        let aspp = AsppConfig::new(backbone.out_planes())
            .with_out_channels(self.aspp_channels)
            .with_rates(self.aspp_rates.clone())
            .with_norm(norm.clone())
            .with_act(act.clone());

        let decoder = DecoderConfig::new(
            self.aspp_channels,
            backbone.low_level_planes(),
            self.num_classes,
        )
        .with_low_level_channels(self.low_level_channels)
        .with_decoder_channels(self.decoder_channels)
        .with_norm(norm)
        .with_act(act);

        let head = DenseConfig::new(backbone.out_planes(), self.num_classes)
            .with_bias(backbone_config.dense_bias);

        tracing::debug!(
            num_classes = self.num_classes,
            layers = ?backbone_config.layers,
            "initialized DeepLabV3+"
        );

        DeepLabV3Plus {
            head: head.init(device),
            aspp: aspp.init(device),
            decoder: decoder.init(device),
            backbone,
        }
    }
}

/// [`DeepLabV3Plus`] output.
#[derive(Debug, Clone)]
pub struct DeepLabOutput<B: Backend> {
    /// Image-level logits; ``[batch, num_classes]``.
    pub classification: Tensor<B, 2>,

    /// Per-pixel logits; ``[batch, num_classes, height, width]``.
    pub segmentation: Tensor<B, 4>,
}

/// `DeepLabV3+` segmentation model.
#[derive(Module, Debug)]
pub struct DeepLabV3Plus<B: Backend> {
    /// Headless dilated backbone.
    pub backbone: ResNetBackbone<B>,

    /// Image-level classification head.
    pub head: Dense<B>,

    /// Pyramid pooling over the high-level features.
    pub aspp: Aspp<B>,

    /// Low-level fusion and per-pixel classifier.
    pub decoder: Decoder<B>,
}

impl<B: Backend> DeepLabV3Plus<B> {
    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.decoder.num_classes()
    }

    /// Image-level classification only.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    pub fn classify(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let features = self.backbone.forward_features(images).high_level;
        self.head.forward(self.backbone.global_pool(features))
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `images`: ``[batch, in_channels, height, width]``.
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
    ) -> DeepLabOutput<B> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &images,
            &["batch", "height", "width"],
            &[("in_channels", self.backbone.in_channels())],
        );

        let features = self.backbone.forward_features(images);

        let classification = self
            .head
            .forward(self.backbone.global_pool(features.high_level.clone()));

        let x = self.aspp.forward(features.high_level);
        let x = self.decoder.forward(x, features.low_level);
        let segmentation = resize_bilinear(x, [height, width]);

        assert_shape_contract_periodically!(
            ["batch", "num_classes", "height", "width"],
            &segmentation,
            &[
                ("batch", batch),
                ("num_classes", self.num_classes()),
                ("height", height),
                ("width", width)
            ],
        );

        DeepLabOutput {
            classification,
            segmentation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::conv_norm_act::ConvNormAct2dMeta;
    use crate::layers::dense::DenseMeta;
    use crate::models::deeplab::aspp::AsppMeta;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;
    use hamcrest::prelude::*;

    fn tiny(num_classes: usize) -> DeepLabV3PlusConfig {
        DeepLabV3PlusConfig::new(
            num_classes,
            ResNetBackboneContractConfig::new(vec![1, 1, 1, 1, 1])
                .with_stem_width(8)
                .with_base_depth(2),
        )
        .with_aspp_channels(8)
        .with_decoder_channels(6)
        .with_low_level_channels(4)
        .with_aspp_rates(vec![1, 2])
    }

    #[test]
    fn test_config_defaults() {
        let config = DeepLabV3PlusConfig::resnet_50(80);
        assert_eq!(config.aspp_channels, 128);
        assert_eq!(config.decoder_channels, 64);
        assert_eq!(config.low_level_channels, 48);
        assert_eq!(config.aspp_rates, vec![6, 12, 18]);
        assert_eq!(config.try_validate(), Ok(()));

        assert_that!(config.feature_resolution([224, 224]), equal_to([28, 28]));
        assert_that!(
            config.output_shapes([16, 3, 224, 224]),
            equal_to(([16, 80], [16, 80, 224, 224]))
        );

        assert!(DeepLabV3PlusConfig::resnet_50(0).try_validate().is_err());
    }

    #[test]
    fn test_from_prefab() {
        let config = DeepLabV3PlusConfig::from_prefab("resnet101", 21).unwrap();
        assert_eq!(config.num_classes, 21);
        assert_eq!(config.backbone.layers, vec![1, 3, 4, 23, 3]);

        assert!(DeepLabV3PlusConfig::from_prefab("unknown", 21).is_err());
    }

    #[test]
    #[should_panic(expected = "conv1 should only contain one convolution layer")]
    fn test_bad_backbone_panics() {
        type B = NdArray<f32>;
        let device = Default::default();
        let config = DeepLabV3PlusConfig::new(4, ResNetBackboneContractConfig::new(vec![2, 1, 1]));
        let _model: DeepLabV3Plus<B> = config.init(&device);
    }

    #[test]
    fn test_model_structure() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = DeepLabV3PlusConfig {
            backbone: ResNetBackboneContractConfig::new(vec![1, 1, 1, 1, 1])
                .with_stem_width(8)
                .with_base_depth(2)
                .with_dense_out(99),
            ..tiny(3)
        };
        let model: DeepLabV3Plus<B> = config.init(&device);

        assert!(model.backbone.head.is_none());
        assert_eq!(model.head.d_input(), 64);
        assert_eq!(model.head.d_output(), 3);
        assert_eq!(model.aspp.in_channels(), 64);
        assert_eq!(model.aspp.rates(), vec![1, 2]);
        assert_eq!(model.decoder.reduce.in_channels(), 8);
        assert_eq!(model.num_classes(), 3);
    }

    #[test]
    fn test_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: DeepLabV3Plus<B> = tiny(5).init(&device);

        for [height, width] in [[32, 32], [30, 21]] {
            let images = Tensor::random([2, 3, height, width], Distribution::Default, &device);
            let output = model.forward(images.clone());

            assert_shape_contract!(
                ["batch", "classes"],
                &output.classification,
                &[("batch", 2), ("classes", 5)],
            );
            assert_shape_contract!(
                ["batch", "classes", "height", "width"],
                &output.segmentation,
                &[
                    ("batch", 2),
                    ("classes", 5),
                    ("height", height),
                    ("width", width)
                ],
            );

            model
                .classify(images)
                .to_data()
                .assert_eq(&output.classification.to_data(), true);
        }
    }

    #[test]
    fn test_backward() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let model: DeepLabV3Plus<B> = tiny(4).init(&device);

        let images = Tensor::random([2, 3, 30, 21], Distribution::Default, &device);
        let output = model.forward(images);
        assert_eq!(output.segmentation.dims(), [2, 4, 30, 21]);

        let grads = output.segmentation.sum().backward();
        assert!(
            model
                .decoder
                .classifier
                .conv
                .weight
                .grad(&grads)
                .is_some()
        );
        assert!(model.aspp.project.conv.weight.grad(&grads).is_some());
        assert!(model.backbone.stem.cna.conv.weight.grad(&grads).is_some());
        // the classification head is not on the segmentation path.
        assert!(model.head.linear.weight.grad(&grads).is_none());
    }

    #[test]
    fn test_default_model_on_small_images() {
        type B = NdArray<f32>;
        let device = Default::default();

        // 64x64 images give 8x8 features, smaller than every ASPP rate.
        let model: DeepLabV3Plus<B> = DeepLabV3PlusConfig::resnet_50(3).init(&device);
        let output = model.forward(Tensor::random([1, 3, 64, 64], Distribution::Default, &device));

        assert_eq!(output.classification.dims(), [1, 3]);
        assert_eq!(output.segmentation.dims(), [1, 3, 64, 64]);
    }

    #[test]
    #[ignore = "full-size; run with --ignored"]
    fn test_full_size_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = DeepLabV3PlusConfig::resnet_50(80);
        let model: DeepLabV3Plus<B> = config.init(&device);

        let output = model.forward(Tensor::random(
            [16, 3, 224, 224],
            Distribution::Default,
            &device,
        ));
        let (classification, segmentation) = config.output_shapes([16, 3, 224, 224]);
        assert_eq!(output.classification.dims(), classification);
        assert_eq!(output.segmentation.dims(), segmentation);
    }
}
