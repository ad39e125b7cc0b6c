//! # Dilated `ResNet` Backbone
//!
//! [`ResNetBackbone`] is a `ResNet` feature extractor whose last two stages
//! are atrous. With two standard stages the output stride is 8.
//!
//! [`ResNetBackboneContractConfig`] implements [`Config`], and provides
//! a high-level configuration interface from a stage block-count table.
//! It provides [`ResNetBackboneContractConfig::to_structure`] to convert
//! to a [`ResNetBackboneStructureConfig`].
//!
//! [`ResNetBackboneStructureConfig`] implements [`Config`], and provides
//! [`ResNetBackboneStructureConfig::init`] to initialize a [`ResNetBackbone`].
//!
//! ## Stage table
//!
//! The first entry of the table counts the stem convolutions, and must be `1`.
//! For a table of length `n`:
//! * stages `1..n-2` are standard; bottleneck depth starts at `base_depth`
//!   and doubles per stage; every standard stage after the first halves
//!   the resolution on its first block.
//! * stages `n-2..n` are atrous, at dilation `2 * (i - n + 3)`; `2` then `4`.
//!   The depth keeps doubling; the resolution is held.
//!
//! | variant | table |
//! | ------- | ----- |
//! | `resnet_50` | `[1, 3, 4, 6, 3]` |
//! | `resnet_101` | `[1, 3, 4, 23, 3]` |

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::dense::{Dense, DenseConfig, DenseMeta};
use crate::models::resnet::stage::{Stage, StageConfig, StageKind, StageMeta};
use crate::models::resnet::stem::{ResNetStem, ResNetStemConfig, ResNetStemMeta};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::module::Module;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::prelude::{Backend, Config, Tensor};

/// ResNet-50 stage block counts.
pub const RESNET50_BLOCKS: [usize; 5] = [1, 3, 4, 6, 3];

/// ResNet-101 stage block counts.
pub const RESNET101_BLOCKS: [usize; 5] = [1, 3, 4, 23, 3];

/// Precondition message for the stem entry of the stage table.
pub const STEM_PRECONDITION: &str = "conv1 should only contain one convolution layer";

/// [`ResNetBackbone`] Meta API.
pub trait ResNetBackboneMeta {
    /// Number of input image channels.
    fn in_channels(&self) -> usize;

    /// Channels of the low-level (stride 4) features.
    fn low_level_planes(&self) -> usize;

    /// Channels of the high-level features.
    fn out_planes(&self) -> usize;

    /// Classification head width; `None` when there is no head.
    fn dense_out(&self) -> Option<usize>;

    /// Total spatial stride of the high-level features.
    fn output_stride(&self) -> usize;

    /// Get the high-level feature resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2];

    /// Get the low-level feature resolution for a given input resolution.
    fn low_level_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2];
}

/// High-level [`ResNetBackbone`] configuration.
#[derive(Config, Debug)]
pub struct ResNetBackboneContractConfig {
    /// Stage block counts; the first entry is the stem and must be `1`.
    pub layers: Vec<usize>,

    /// Number of input image channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// Stem output channels.
    #[config(default = 64)]
    pub stem_width: usize,

    /// Bottleneck depth of the first stage.
    #[config(default = 64)]
    pub base_depth: usize,

    /// Block output expansion over the bottleneck depth.
    #[config(default = 4)]
    pub expansion: usize,

    /// Classification head width; `0` disables the head.
    #[config(default = 0)]
    pub dense_out: usize,

    /// Add a bias to the classification head.
    #[config(default = true)]
    pub dense_bias: bool,

    /// Normalization for every conv layer.
    #[config(default = "Some(NormalizationConfig::default_batch())")]
    pub norm: Option<NormalizationConfig>,

    /// Activation for every conv layer.
    #[config(default = "ActivationConfig::Relu6")]
    pub act: ActivationConfig,
}

impl ResNetBackboneContractConfig {
    /// A ResNet-50 backbone.
    pub fn resnet_50(dense_out: usize) -> Self {
        Self::new(RESNET50_BLOCKS.to_vec()).with_dense_out(dense_out)
    }

    /// A ResNet-101 backbone.
    pub fn resnet_101(dense_out: usize) -> Self {
        Self::new(RESNET101_BLOCKS.to_vec()).with_dense_out(dense_out)
    }

    /// Check the stage table.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.layers.first() != Some(&1) {
            return Err(STEM_PRECONDITION.to_string());
        }
        if self.layers.len() < 3 {
            return Err(format!(
                "layers must hold the stem and at least two stages: {:?}",
                self.layers
            ));
        }
        if let Some(idx) = self.layers.iter().position(|&n| n == 0) {
            return Err(format!(
                "layers[{idx}] is empty; every stage needs a block: {:?}",
                self.layers
            ));
        }
        if self.expansion == 0 || self.base_depth == 0 || self.stem_width == 0 {
            return Err(format!(
                "widths must be positive: stem_width={}, base_depth={}, expansion={}",
                self.stem_width, self.base_depth, self.expansion
            ));
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err)
        }
    }

    /// The kind of each stage, in order; excludes the stem entry.
    pub fn stage_kinds(&self) -> Vec<StageKind> {
        let n = self.layers.len();
        (1..n)
            .map(|i| {
                if i < n - 2 {
                    StageKind::Standard { downsample: i > 1 }
                } else {
                    StageKind::Atrous {
                        dilation: 2 * (i + 3 - n),
                    }
                }
            })
            .collect()
    }

    /// Convert to a [`ResNetBackboneStructureConfig`].
    ///
    /// # Panics
    ///
    /// If the config is invalid; a stem entry other than `1` panics with
    /// [`STEM_PRECONDITION`].
    pub fn to_structure(&self) -> ResNetBackboneStructureConfig {
        self.expect_valid();

        let stem = ResNetStemConfig::standard(
            self.in_channels,
            self.stem_width,
            self.norm.clone(),
            self.act.clone(),
        );

        let mut in_planes = self.stem_width;
        let mut depth = self.base_depth;
        let stages = self
            .stage_kinds()
            .into_iter()
            .zip(self.layers.iter().skip(1))
            .map(|(kind, &num_blocks)| {
                let stage = StageConfig::build(
                    kind,
                    num_blocks,
                    in_planes,
                    depth,
                    self.expansion,
                    self.norm.clone(),
                    self.act.clone(),
                );
                in_planes = stage.out_planes();
                depth *= 2;
                stage
            })
            .collect();

        let head = if self.dense_out > 0 {
            Some(DenseConfig::new(in_planes, self.dense_out).with_bias(self.dense_bias))
        } else {
            None
        };

        ResNetBackboneStructureConfig::new(stem, stages).with_head(head)
    }
}

impl ResNetBackboneMeta for ResNetBackboneContractConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn low_level_planes(&self) -> usize {
        self.to_structure().low_level_planes()
    }

    fn out_planes(&self) -> usize {
        self.to_structure().out_planes()
    }

    fn dense_out(&self) -> Option<usize> {
        if self.dense_out > 0 {
            Some(self.dense_out)
        } else {
            None
        }
    }

    fn output_stride(&self) -> usize {
        self.to_structure().output_stride()
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.to_structure().output_resolution(input_resolution)
    }

    fn low_level_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.to_structure().low_level_resolution(input_resolution)
    }
}

/// [`ResNetBackbone`] Structure Config.
///
/// This config defines the structure of a converted backbone.
/// It checks only the channel chain between its parts.
#[derive(Config, Debug)]
pub struct ResNetBackboneStructureConfig {
    /// The input stem.
    pub stem: ResNetStemConfig,

    /// The stages; the first stage output is the low-level feature map.
    pub stages: Vec<StageConfig>,

    /// Optional classification head.
    #[config(default = "None")]
    pub head: Option<DenseConfig>,
}

impl ResNetBackboneMeta for ResNetBackboneStructureConfig {
    fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn low_level_planes(&self) -> usize {
        self.stages[0].out_planes()
    }

    fn out_planes(&self) -> usize {
        self.stages[self.stages.len() - 1].out_planes()
    }

    fn dense_out(&self) -> Option<usize> {
        self.head.as_ref().map(|head| head.d_output())
    }

    fn output_stride(&self) -> usize {
        self.stages
            .iter()
            .fold(self.stem.stride(), |acc, stage| acc * stage.stride())
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.stages.iter().fold(
            self.stem.output_resolution(input_resolution),
            |res, stage| stage.output_resolution(res),
        )
    }

    fn low_level_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.stages[0].output_resolution(self.stem.output_resolution(input_resolution))
    }
}

impl ResNetBackboneStructureConfig {
    /// Check the channel chain.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err("stages is empty".to_string());
        }

        let mut planes = self.stem.out_channels();
        for (idx, stage) in self.stages.iter().enumerate() {
            stage.try_validate()?;
            if stage.in_planes() != planes {
                return Err(format!(
                    "stages[{idx}].in_planes({}) != {planes}",
                    stage.in_planes()
                ));
            }
            planes = stage.out_planes();
        }

        if let Some(head) = &self.head {
            if head.d_input() != planes {
                return Err(format!("head.d_input({}) != {planes}", head.d_input()));
            }
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err)
        }
    }

    /// Initialize a [`ResNetBackbone`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNetBackbone<B> {
        self.expect_valid();

        ResNetBackbone {
            stem: self.stem.init(device),
            stages: self.stages.iter().map(|stage| stage.init(device)).collect(),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: self.head.as_ref().map(|head| head.init(device)),
        }
    }
}

/// Backbone feature maps.
#[derive(Debug, Clone)]
pub struct BackboneFeatures<B: Backend> {
    /// First stage output; ``[batch, low_level_planes, in_height/4, in_width/4]``.
    pub low_level: Tensor<B, 4>,

    /// Last stage output; ``[batch, out_planes, in_height/8, in_width/8]``.
    pub high_level: Tensor<B, 4>,
}

/// Backbone output.
#[derive(Debug, Clone)]
pub struct BackboneOutput<B: Backend> {
    /// Pre-pool feature map; ``[batch, out_planes, out_height, out_width]``.
    pub features: Tensor<B, 4>,

    /// Classification logits, when the head is present; ``[batch, dense_out]``.
    pub logits: Option<Tensor<B, 2>>,
}

/// Dilated `ResNet` backbone.
#[derive(Module, Debug)]
pub struct ResNetBackbone<B: Backend> {
    /// Input stem.
    pub stem: ResNetStem<B>,

    /// Stages.
    pub stages: Vec<Stage<B>>,

    /// Global average pool.
    pub pool: AdaptiveAvgPool2d,

    /// Optional classification head.
    pub head: Option<Dense<B>>,
}

impl<B: Backend> ResNetBackboneMeta for ResNetBackbone<B> {
    fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn low_level_planes(&self) -> usize {
        self.stages[0].out_planes()
    }

    fn out_planes(&self) -> usize {
        self.stages[self.stages.len() - 1].out_planes()
    }

    fn dense_out(&self) -> Option<usize> {
        self.head.as_ref().map(|head| head.d_output())
    }

    fn output_stride(&self) -> usize {
        self.stages
            .iter()
            .fold(self.stem.stride(), |acc, stage| acc * stage.stride())
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.stages.iter().fold(
            self.stem.output_resolution(input_resolution),
            |res, stage| stage.output_resolution(res),
        )
    }

    fn low_level_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.stages[0].output_resolution(self.stem.output_resolution(input_resolution))
    }
}

impl<B: Backend> ResNetBackbone<B> {
    /// Extract the low-level and high-level feature maps.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    pub fn forward_features(
        &self,
        input: Tensor<B, 4>,
    ) -> BackboneFeatures<B> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("in_channels", self.in_channels())],
        );

        let x = self.stem.forward(input);
        let low_level = self.stages[0].forward(x);
        let high_level = self.stages[1..]
            .iter()
            .fold(low_level.clone(), |x, stage| stage.forward(x));

        let [out_height, out_width] = self.output_resolution([height, width]);
        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &high_level,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        BackboneFeatures {
            low_level,
            high_level,
        }
    }

    /// Apply the classification head to a feature map.
    ///
    /// Global average pool over the spatial axes, then the dense projection.
    ///
    /// # Returns
    ///
    /// ``[batch, dense_out]`` logits; `None` when there is no head.
    pub fn classify(
        &self,
        features: Tensor<B, 4>,
    ) -> Option<Tensor<B, 2>> {
        self.head
            .as_ref()
            .map(|head| head.forward(self.global_pool(features)))
    }

    /// Global average pool over the spatial axes.
    ///
    /// # Arguments
    ///
    /// - `features`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, channels]``
    pub fn global_pool(
        &self,
        features: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let x = self.pool.forward(features);
        // [B, C, 1, 1] -> [B, C]
        x.flatten(1, 3)
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// The pre-pool feature map, and the logits when the head is present.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> BackboneOutput<B> {
        let features = self.forward_features(input).high_level;
        let logits = self.classify(features.clone());
        BackboneOutput { features, logits }
    }
}
