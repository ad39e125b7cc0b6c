//! # Backbone Stage
//!
//! A [`Stage`] is a sequence of blocks of one kind:
//! * [`StageKind::Standard`] - [`ResidualBlock`]s; optionally halving the
//!   resolution on the first block.
//! * [`StageKind::Atrous`] - [`AtrousBlock`]s at a fixed dilation rate.
//!
//! [`StageMeta`] defines a common meta API for [`Stage`] and [`StageConfig`].
//!
//! [`StageBlockConfig`] / [`StageBlock`] wrap the two block families.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::models::resnet::atrous_block::{AtrousBlock, AtrousBlockConfig, AtrousBlockMeta};
use crate::models::resnet::residual_block::{
    ResidualBlock, ResidualBlockConfig, ResidualBlockMeta,
};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};
use serde::{Deserialize, Serialize};

/// The kind of a backbone stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageKind {
    /// Standard bottleneck blocks.
    Standard {
        /// Halve the resolution on the first block.
        downsample: bool,
    },

    /// Atrous bottleneck blocks.
    Atrous {
        /// The dilation rate of every block.
        dilation: usize,
    },
}

/// Meta API shared by all block kinds.
pub trait StageBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The spatial stride of the block.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2];
}

/// [`StageBlock`] Config.
#[derive(Config, Debug)]
pub enum StageBlockConfig {
    /// A [`ResidualBlock`].
    Standard(ResidualBlockConfig),

    /// An [`AtrousBlock`].
    Atrous(AtrousBlockConfig),
}

impl From<ResidualBlockConfig> for StageBlockConfig {
    fn from(config: ResidualBlockConfig) -> Self {
        Self::Standard(config)
    }
}

impl From<AtrousBlockConfig> for StageBlockConfig {
    fn from(config: AtrousBlockConfig) -> Self {
        Self::Atrous(config)
    }
}

impl StageBlockMeta for StageBlockConfig {
    fn in_planes(&self) -> usize {
        match self {
            Self::Standard(config) => config.in_planes(),
            Self::Atrous(config) => config.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Standard(config) => config.out_planes(),
            Self::Atrous(config) => config.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Standard(config) => config.stride(),
            Self::Atrous(_) => 1,
        }
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        match self {
            Self::Standard(config) => config.output_resolution(input_resolution),
            Self::Atrous(config) => config.output_resolution(input_resolution),
        }
    }
}

impl StageBlockConfig {
    /// Initialize a [`StageBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> StageBlock<B> {
        match self {
            Self::Standard(config) => StageBlock::Standard(config.init(device)),
            Self::Atrous(config) => StageBlock::Atrous(config.init(device)),
        }
    }
}

/// A [`ResidualBlock`] or [`AtrousBlock`] wrapper.
#[derive(Module, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum StageBlock<B: Backend> {
    /// A [`ResidualBlock`].
    Standard(ResidualBlock<B>),

    /// An [`AtrousBlock`].
    Atrous(AtrousBlock<B>),
}

impl<B: Backend> StageBlockMeta for StageBlock<B> {
    fn in_planes(&self) -> usize {
        match self {
            Self::Standard(block) => block.in_planes(),
            Self::Atrous(block) => block.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Standard(block) => block.out_planes(),
            Self::Atrous(block) => block.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Standard(block) => block.stride(),
            Self::Atrous(_) => 1,
        }
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        match self {
            Self::Standard(block) => block.output_resolution(input_resolution),
            Self::Atrous(block) => block.output_resolution(input_resolution),
        }
    }
}

impl<B: Backend> StageBlock<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Self::Standard(block) => block.forward(input),
            Self::Atrous(block) => block.forward(input),
        }
    }
}

/// [`Stage`] Meta API.
pub trait StageMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the stage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The effective stride of the stage.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2];
}

/// [`Stage`] Config.
#[derive(Config, Debug)]
pub struct StageConfig {
    /// The component blocks.
    pub blocks: Vec<StageBlockConfig>,
}

impl From<Vec<StageBlockConfig>> for StageConfig {
    fn from(blocks: Vec<StageBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl StageMeta for StageConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.blocks
            .iter()
            .fold(input_resolution, |res, block| block.output_resolution(res))
    }
}

impl StageConfig {
    /// Build a stage of `num_blocks` blocks of the given kind.
    ///
    /// The first block maps `in_planes` to `depth * expansion`;
    /// the rest keep `depth * expansion`.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        kind: StageKind,
        num_blocks: usize,
        in_planes: usize,
        depth: usize,
        expansion: usize,
        norm: Option<NormalizationConfig>,
        act: ActivationConfig,
    ) -> Self {
        let out_planes = depth * expansion;
        let blocks = (0..num_blocks)
            .map(|b| {
                let block_in = if b == 0 { in_planes } else { out_planes };
                match kind {
                    StageKind::Standard { downsample } => {
                        ResidualBlockConfig::new(block_in, depth, out_planes)
                            .with_half_size(downsample && b == 0)
                            .with_norm(norm.clone())
                            .with_act(act.clone())
                            .into()
                    }
                    StageKind::Atrous { dilation } => {
                        AtrousBlockConfig::new(block_in, depth, out_planes)
                            .with_dilation(dilation)
                            .with_norm(norm.clone())
                            .with_act(act.clone())
                            .into()
                    }
                }
            })
            .collect();

        Self { blocks }
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("blocks is empty".to_string());
        }

        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_planes() != curr.in_planes() {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})\n{:#?}",
                    idx - 1,
                    prev.out_planes(),
                    idx,
                    curr.in_planes(),
                    self,
                ));
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

    /// Initialize a new [`Stage`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Stage<B> {
        self.expect_valid();

        Stage {
            blocks: self.blocks.iter().map(|block| block.init(device)).collect(),
        }
    }
}

/// Backbone stage.
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<StageBlock<B>>,
}

impl<B: Backend> StageMeta for Stage<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.blocks
            .iter()
            .fold(input_resolution, |res, block| block.output_resolution(res))
    }
}

impl<B: Backend> Stage<B> {
    /// Apply the stage.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_planes", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_planes", self.in_planes())],
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }
}
