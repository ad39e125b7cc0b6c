//! # `ConvNormAct2d` - conv/norm/activation layer.
//!
//! A [`ConvNormAct2d`] module is:
//! * a square-kernel [`Conv2d`] layer, with optional stride and dilation,
//! * an optional [`Normalization`] layer,
//! * an optional [`Activation`] layer.
//!
//! Dropping the activation yields the normalized conv output; residual
//! blocks use that for their final layer, which is activated only after
//! the shortcut sum.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use crate::layers::conv_shape::{PaddingMode, expect_conv2d_output_resolution};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Initializer, PaddingConfig2d};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::module::conv2d;
use burn::tensor::ops::ConvOptions;

/// Default filter initializer; ``N(0, 0.1)``.
pub const DEFAULT_FILTER_INITIALIZER: Initializer = Initializer::Normal {
    mean: 0.0,
    std: 0.1,
};

/// [`ConvNormAct2d`] Meta.
pub trait ConvNormAct2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Square kernel size.
    fn kernel_size(&self) -> usize;

    /// Stride, both spatial dims.
    fn stride(&self) -> usize;

    /// Dilation rate, both spatial dims.
    fn dilation(&self) -> usize;

    /// Per-side padding, both spatial dims.
    fn padding(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[out_height, out_width]``
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        expect_conv2d_output_resolution(
            input_resolution,
            self.kernel_size(),
            self.stride(),
            self.padding(),
            self.dilation(),
        )
    }
}

/// [`ConvNormAct2d`] Config.
///
/// Implements [`ConvNormAct2dMeta`].
#[derive(Config, Debug)]
pub struct ConvNormAct2dConfig {
    /// Number of input channels.
    pub in_channels: usize,

    /// Number of output channels.
    pub out_channels: usize,

    /// Square kernel size.
    pub kernel_size: usize,

    /// Stride.
    #[config(default = 1)]
    pub stride: usize,

    /// Dilation rate.
    #[config(default = 1)]
    pub dilation: usize,

    /// Padding policy.
    #[config(default = "PaddingMode::Same")]
    pub padding: PaddingMode,

    /// Optional [`Normalization`] config.
    ///
    /// The feature size is matched to `out_channels` on init.
    #[config(default = "Some(NormalizationConfig::default_batch())")]
    pub norm: Option<NormalizationConfig>,

    /// Optional [`Activation`] config.
    #[config(default = "Some(ActivationConfig::Relu6)")]
    pub act: Option<ActivationConfig>,

    /// Filter initializer.
    #[config(default = "DEFAULT_FILTER_INITIALIZER")]
    pub initializer: Initializer,

    /// Add a learned bias to the conv.
    #[config(default = false)]
    pub bias: bool,
}

impl ConvNormAct2dMeta for ConvNormAct2dConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn dilation(&self) -> usize {
        self.dilation
    }

    fn padding(&self) -> usize {
        self.padding.padding(self.kernel_size, self.dilation)
    }
}

impl ConvNormAct2dConfig {
    /// Shorthand for a `1x1` projection.
    pub fn pointwise(
        in_channels: usize,
        out_channels: usize,
    ) -> Self {
        Self::new(in_channels, out_channels, 1)
    }

    /// Apply a shared norm/act policy.
    pub fn with_policy(
        self,
        norm: Option<NormalizationConfig>,
        act: Option<ActivationConfig>,
    ) -> Self {
        Self { norm, act, ..self }
    }

    /// Build the inner [`Conv2dConfig`].
    pub fn conv_config(&self) -> Conv2dConfig {
        Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([self.stride, self.stride])
        .with_dilation([self.dilation, self.dilation])
        .with_padding(
            self.padding
                .to_padding_config(self.kernel_size, self.dilation),
        )
        .with_initializer(self.initializer.clone())
        .with_bias(self.bias)
    }

    /// Initialize a [`ConvNormAct2d`].
    ///
    /// Auto-matches the norm layer features
    /// to the conv layer's output channels.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvNormAct2d<B> {
        ConvNormAct2d {
            conv: self.conv_config().init(device),
            norm: self
                .norm
                .as_ref()
                .map(|norm| norm.clone().with_num_features(self.out_channels).init(device)),
            act: self.act.as_ref().map(|act| act.init(device)),
        }
    }
}

/// Sequenced conv/norm/activation layer.
///
/// Implements [`ConvNormAct2dMeta`].
#[derive(Module, Debug)]
pub struct ConvNormAct2d<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Optional Norm Layer.
    pub norm: Option<Normalization<B>>,

    /// Optional Activation layer.
    pub act: Option<Activation<B>>,
}

impl<B: Backend> ConvNormAct2dMeta for ConvNormAct2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn kernel_size(&self) -> usize {
        self.conv.kernel_size[0]
    }

    fn stride(&self) -> usize {
        self.conv.stride[0]
    }

    fn dilation(&self) -> usize {
        self.conv.dilation[0]
    }

    fn padding(&self) -> usize {
        // Built from `PaddingMode`; always explicit and symmetric.
        match &self.conv.padding.0 {
            PaddingConfig2d::Explicit(p, _) => *p,
            PaddingConfig2d::Valid => 0,
            other => unreachable!("unexpected conv padding: {other:?}"),
        }
    }
}

impl<B: Backend> ConvNormAct2d<B> {
    /// Forward Pass.
    ///
    /// ```rust,ignore
    /// let x = self.conv.forward(input);
    /// let x = self.norm.forward(x);  // when present
    /// let x = self.act.forward(x);   // when present
    /// ```
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
            &[("in_channels", self.in_channels())]
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let x = self.conv_forward(input, [in_height, in_width]);

        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };

        let x = match &self.act {
            Some(act) => act.forward(x),
            None => x,
        };

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }

    /// The convolution, with off-center taps dropped on any axis where they
    /// can never land inside the input.
    ///
    /// With same padding and ``dilation >= size`` every non-center tap on
    /// that axis reads padding, so the kernel collapses to its center
    /// row or column with no padding on that axis. The output resolution is
    /// unchanged.
    fn conv_forward(
        &self,
        input: Tensor<B, 4>,
        [height, width]: [usize; 2],
    ) -> Tensor<B, 4> {
        let kernel_size = self.kernel_size();
        let dilation = self.dilation();
        let padding = self.padding();

        let same = padding == dilation * (kernel_size - 1) / 2;
        let trim_height = same && kernel_size > 1 && dilation >= height;
        let trim_width = same && kernel_size > 1 && dilation >= width;
        if !(trim_height || trim_width) {
            return self.conv.forward(input);
        }

        let center = kernel_size / 2;
        let mut weight = self.conv.weight.val();
        let mut paddings = [padding, padding];
        let mut dilations = [dilation, dilation];
        if trim_height {
            weight = weight.narrow(2, center, 1);
            paddings[0] = 0;
            dilations[0] = 1;
        }
        if trim_width {
            weight = weight.narrow(3, center, 1);
            paddings[1] = 0;
            dilations[1] = 1;
        }

        conv2d(
            input,
            weight,
            self.conv.bias.as_ref().map(|bias| bias.val()),
            ConvOptions::new(self.conv.stride, paddings, dilations, self.conv.groups),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_config_defaults() {
        let config = ConvNormAct2dConfig::new(2, 4, 3);

        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.kernel_size(), 3);
        assert_eq!(config.stride(), 1);
        assert_eq!(config.dilation(), 1);
        assert_eq!(config.padding(), 1);
        assert!(matches!(config.act, Some(ActivationConfig::Relu6)));
        assert!(matches!(config.norm, Some(NormalizationConfig::Batch(_))));
        assert!(!config.bias);

        assert_eq!(config.output_resolution([10, 9]), [10, 9]);

        let config = config.with_stride(2).with_dilation(3);
        assert_eq!(config.padding(), 3);
        assert_eq!(config.output_resolution([10, 9]), [5, 5]);

        let config = config.with_padding(PaddingMode::Valid);
        assert_eq!(config.padding(), 0);
        assert_eq!(config.output_resolution([10, 9]), [2, 2]);
    }

    #[test]
    fn test_meta_matches_config() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = ConvNormAct2dConfig::new(3, 8, 7).with_stride(2);
        let layer: ConvNormAct2d<B> = config.init(&device);

        assert_eq!(layer.in_channels(), 3);
        assert_eq!(layer.out_channels(), 8);
        assert_eq!(layer.kernel_size(), 7);
        assert_eq!(layer.stride(), 2);
        assert_eq!(layer.dilation(), 1);
        assert_eq!(layer.padding(), 3);
        assert_eq!(layer.output_resolution([224, 224]), [112, 112]);
        assert!(layer.conv.bias.is_none());

        match &layer.norm {
            Some(norm) => assert_eq!(norm.num_features(), 8),
            None => panic!("expected a norm layer"),
        }
    }

    #[test]
    fn test_forward_sequence() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let layer: ConvNormAct2d<B> = ConvNormAct2dConfig::new(2, 4, 3)
            .with_stride(2)
            .init(&device);

        let input = Tensor::random([2, 2, 9, 10], Distribution::Default, &device);

        let output = layer.forward(input.clone());
        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_channels", 4),
                ("out_height", 5),
                ("out_width", 5)
            ],
        );

        let expected = {
            let x = layer.conv.forward(input);
            let x = layer.norm.as_ref().unwrap().forward(x);
            layer.act.as_ref().unwrap().forward(x)
        };
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_activation_is_last_and_optional() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNormAct2d<B> = ConvNormAct2dConfig::new(2, 3, 1)
            .with_act(None)
            .init(&device);
        assert!(layer.act.is_none());

        let input = Tensor::random([1, 2, 4, 4], Distribution::Default, &device);
        let output = layer.forward(input.clone());

        let expected = layer
            .norm
            .as_ref()
            .unwrap()
            .forward(layer.conv.forward(input));
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_dilated_preserves_resolution() {
        type B = NdArray<f32>;
        let device = Default::default();

        for dilation in [1, 2, 4] {
            let layer: ConvNormAct2d<B> = ConvNormAct2dConfig::new(2, 2, 3)
                .with_dilation(dilation)
                .with_policy(None, None)
                .init(&device);

            let output = layer.forward(Tensor::ones([1, 2, 11, 6], &device));
            assert_eq!(output.dims(), [1, 2, 11, 6]);
        }
    }

    #[test]
    fn test_dilation_wider_than_input() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNormAct2d<B> = ConvNormAct2dConfig::new(16, 16, 3)
            .with_dilation(4)
            .with_norm(None)
            .with_act(None)
            .with_bias(true)
            .init(&device);

        let input = Tensor::random([2, 16, 3, 4], Distribution::Default, &device);
        let output = layer.forward(input.clone());
        assert_eq!(output.dims(), [2, 16, 3, 4]);

        // only the center tap ever reads the input.
        let expected = conv2d(
            input,
            layer.conv.weight.val().narrow(2, 1, 1).narrow(3, 1, 1),
            layer.conv.bias.as_ref().map(|bias| bias.val()),
            ConvOptions::new([1, 1], [0, 0], [1, 1], 1),
        );
        output
            .to_data()
            .assert_approx_eq::<f32>(&expected.to_data(), burn::tensor::Tolerance::default());
    }

    #[test]
    fn test_dilation_wider_than_one_axis() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNormAct2d<B> = ConvNormAct2dConfig::new(2, 3, 3)
            .with_dilation(3)
            .with_norm(None)
            .with_act(None)
            .init(&device);

        // height 3 collapses to the center row; width 7 keeps all taps.
        let input = Tensor::random([1, 2, 3, 7], Distribution::Default, &device);
        let output = layer.forward(input.clone());
        assert_eq!(output.dims(), [1, 3, 3, 7]);

        let expected = layer.conv.forward(input);
        output
            .to_data()
            .assert_approx_eq::<f32>(&expected.to_data(), burn::tensor::Tolerance::default());
    }

    #[test]
    fn test_strided_dilation_wider_than_input() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let layer: ConvNormAct2d<B> = ConvNormAct2dConfig::new(16, 8, 3)
            .with_stride(2)
            .with_dilation(8)
            .init(&device);

        let input = Tensor::random([2, 16, 5, 3], Distribution::Default, &device);
        let output = layer.forward(input);
        assert_eq!(output.dims(), [2, 8, 3, 2]);

        let grads = output.sum().backward();
        let grad = layer.conv.weight.grad(&grads).unwrap();
        assert_eq!(grad.dims(), [8, 16, 3, 3]);
    }
}
