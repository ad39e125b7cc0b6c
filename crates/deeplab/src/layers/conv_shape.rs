//! # Convolution Shape Utilities
//!
//! Padding policy and output-size arithmetic for 2d convolutions and pools.

use burn::config::Config;
use burn::nn::PaddingConfig2d;

/// Padding policy for square kernels.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum PaddingMode {
    /// Symmetric padding of ``dilation * (kernel_size - 1) / 2``.
    ///
    /// For odd kernels this yields ``out_size = ceil(in_size / stride)``.
    Same,

    /// No padding.
    Valid,
}

impl Default for PaddingMode {
    fn default() -> Self {
        Self::Same
    }
}

impl PaddingMode {
    /// The per-side padding for a square kernel.
    ///
    /// # Panics
    ///
    /// If the mode is `Same` and the kernel size is even.
    pub fn padding(
        &self,
        kernel_size: usize,
        dilation: usize,
    ) -> usize {
        match self {
            PaddingMode::Valid => 0,
            PaddingMode::Same => {
                assert!(
                    kernel_size % 2 == 1,
                    "Same padding requires an odd kernel size: {kernel_size}"
                );
                dilation * (kernel_size - 1) / 2
            }
        }
    }

    /// Build the matching [`PaddingConfig2d`].
    pub fn to_padding_config(
        &self,
        kernel_size: usize,
        dilation: usize,
    ) -> PaddingConfig2d {
        let p = self.padding(kernel_size, dilation);
        PaddingConfig2d::Explicit(p, p)
    }
}

/// Predict the output size of a 1D convolution operation.
///
/// ```text
/// out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
/// ```
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0.
pub fn maybe_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    assert!(input_size > 0);
    assert!(kernel_size > 0);
    assert!(stride > 0);
    assert!(dilation > 0);

    let effective_size = input_size + 2 * padding;
    let pos = effective_size + stride;
    let kernel_width = 1 + dilation * (kernel_size - 1);

    if pos < kernel_width {
        return None;
    }
    let x = (pos - kernel_width) / stride;
    if x < 1 { None } else { Some(x) }
}

/// Predict the ``[height, width]`` output of a square-kernel 2d convolution.
///
/// # Panics
///
/// If the output size would be <= 0.
pub fn expect_conv2d_output_resolution(
    input_resolution: [usize; 2],
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> [usize; 2] {
    input_resolution.map(|size| {
        match maybe_conv1d_output_size(size, kernel_size, stride, padding, dilation) {
            Some(x) => x,
            None => panic!(
                "No legal output size for conv2d with:\n input_resolution:{input_resolution:?}\n kernel_size:{kernel_size}\n stride:{stride}\n dilation:{dilation}\n padding:{padding}",
            ),
        }
    })
}

/// ``ceil(in_size / stride)`` for each spatial dim.
///
/// This is the output resolution of every `Same`-padded odd-kernel layer.
pub fn same_output_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    assert!(stride > 0);
    input_resolution.map(|size| size.div_ceil(stride))
}
