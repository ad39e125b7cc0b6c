//! # [`ResidualBlock`] - standard bottleneck block.
//!
//! [`ResidualBlock`] is the strided bottleneck unit of the early backbone stages:
//! ```text
//!   reduce:  1x1 conv/norm/act   in_planes -> depth     (stride 2 if half_size)
//!   conv:    3x3 conv/norm/act   depth     -> depth
//!   expand:  1x1 conv/norm       depth     -> out_planes (no activation)
//!   out = act(expand + shortcut)
//! ```
//!
//! The shortcut is the identity when the channel counts match and no
//! downsampling is requested; otherwise it is a strided 1x1 conv/norm/act
//! projection to ``[out_planes, out_height, out_width]``.
//!
//! [`ResidualBlockMeta`] defines a common meta API for [`ResidualBlock`]
//! and [`ResidualBlockConfig`].

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::conv_norm_act::{ConvNormAct2d, ConvNormAct2dConfig, ConvNormAct2dMeta};
use crate::layers::conv_shape::same_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ResidualBlock`] Meta trait.
pub trait ResidualBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The bottleneck depth of the middle convolution.
    fn depth(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// Does the block halve the spatial resolution?
    fn half_size(&self) -> bool;

    /// The stride of the reduce layer and shortcut projection.
    fn stride(&self) -> usize {
        if self.half_size() { 2 } else { 1 }
    }

    /// Does the shortcut path project the input?
    fn has_projection(&self) -> bool {
        self.half_size() || self.in_planes() != self.out_planes()
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[ceil(in_height / stride), ceil(in_width / stride)]``
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        same_output_resolution(input_resolution, self.stride())
    }
}

/// [`ResidualBlock`] Config.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    /// The number of input feature planes.
    pub in_planes: usize,

    /// The bottleneck depth.
    pub depth: usize,

    /// The number of output feature planes.
    pub out_planes: usize,

    /// Halve the spatial resolution.
    #[config(default = false)]
    pub half_size: bool,

    /// [`crate::compat::normalization_wrapper::Normalization`] config.
    #[config(default = "Some(NormalizationConfig::default_batch())")]
    pub norm: Option<NormalizationConfig>,

    /// [`Activation`] config.
    #[config(default = "ActivationConfig::Relu6")]
    pub act: ActivationConfig,
}

impl ResidualBlockMeta for ResidualBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn out_planes(&self) -> usize {
        self.out_planes
    }

    fn half_size(&self) -> bool {
        self.half_size
    }
}

impl ResidualBlockConfig {
    /// Initialize a [`ResidualBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        let stride = self.stride();
        let norm = self.norm.clone();
        let act = Some(self.act.clone());

        let shortcut = if self.has_projection() {
            Some(
                ConvNormAct2dConfig::pointwise(self.in_planes, self.out_planes)
                    .with_stride(stride)
                    .with_policy(norm.clone(), act.clone()),
            )
        } else {
            None
        };

        let reduce = ConvNormAct2dConfig::pointwise(self.in_planes, self.depth)
            .with_stride(stride)
            .with_policy(norm.clone(), act.clone());

        let conv = ConvNormAct2dConfig::new(self.depth, self.depth, 3)
            .with_policy(norm.clone(), act.clone());

        let expand =
            ConvNormAct2dConfig::pointwise(self.depth, self.out_planes).with_policy(norm, None);

        ResidualBlock {
            shortcut: shortcut.map(|c| c.init(device)),
            reduce: reduce.init(device),
            conv: conv.init(device),
            expand: expand.init(device),
            act: self.act.init(device),
        }
    }
}

/// Standard bottleneck residual block.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    /// Optional shortcut projection.
    pub shortcut: Option<ConvNormAct2d<B>>,

    /// `1x1` channel reduction.
    pub reduce: ConvNormAct2d<B>,

    /// `3x3` bottleneck convolution.
    pub conv: ConvNormAct2d<B>,

    /// `1x1` channel expansion; unactivated.
    pub expand: ConvNormAct2d<B>,

    /// Post-sum activation.
    pub act: Activation<B>,
}

impl<B: Backend> ResidualBlockMeta for ResidualBlock<B> {
    fn in_planes(&self) -> usize {
        self.reduce.in_channels()
    }

    fn depth(&self) -> usize {
        self.conv.out_channels()
    }

    fn out_planes(&self) -> usize {
        self.expand.out_channels()
    }

    fn half_size(&self) -> bool {
        self.reduce.stride() == 2
    }

    fn has_projection(&self) -> bool {
        self.shortcut.is_some()
    }
}

impl<B: Backend> ResidualBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_height, out_width]`` tensor.
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

        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.reduce.forward(input);
        let x = self.conv.forward(x);
        let x = self.expand.forward(x);

        let x = self.act.forward(x + identity);

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
