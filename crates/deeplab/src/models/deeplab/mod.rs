//! # `DeepLabV3+`
//!
//! * [`aspp`] - atrous spatial pyramid pooling over the high-level features.
//! * [`decoder`] - low-level feature fusion and per-pixel classifier.
//! * [`deeplab_model`] - the full model; backbone, ASPP, decoder and the
//!   image-level classification head.

pub mod aspp;
pub mod decoder;
pub mod deeplab_model;

pub use deeplab_model::*;

use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;

/// Bilinear resize of an ``[batch, channels, height, width]`` tensor.
///
/// Sample positions use half-pixel centers (``align_corners = false``),
/// clamped at the borders. A no-op when the resolution already matches.
///
/// The resize is two matmuls against fixed interpolation matrices, so it
/// is differentiable on every backend.
pub fn resize_bilinear<B: Backend>(
    input: Tensor<B, 4>,
    resolution: [usize; 2],
) -> Tensor<B, 4> {
    let [batch, channels, height, width] = input.dims();
    let [out_height, out_width] = resolution;
    if [height, width] == resolution {
        return input;
    }
    let device = input.device();

    // [in_width, out_width]
    let cols = interpolation_matrix::<B>(width, out_width, &device).transpose();
    // [in_height, out_height]
    let rows = interpolation_matrix::<B>(height, out_height, &device).transpose();

    let x = input
        .reshape([batch * channels * height, width])
        .matmul(cols)
        .reshape([batch * channels, height, out_width])
        .swap_dims(1, 2)
        .reshape([batch * channels * out_width, height])
        .matmul(rows);

    x.reshape([batch, channels, out_width, out_height])
        .swap_dims(2, 3)
}

/// The ``[output, input]`` linear interpolation matrix for one axis.
///
/// Every row sums to one.
pub fn interpolation_matrix<B: Backend>(
    input: usize,
    output: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let mut weights = vec![0.0f32; output * input];
    let scale = input as f32 / output as f32;
    let last = input.saturating_sub(1);

    for i in 0..output {
        let src = ((i as f32 + 0.5) * scale - 0.5).clamp(0.0, last as f32);
        let lo = (src.floor() as usize).min(last);
        let hi = (lo + 1).min(last);
        let frac = src - lo as f32;

        weights[i * input + lo] += 1.0 - frac;
        weights[i * input + hi] += frac;
    }

    Tensor::from_data(
        TensorData::new(weights, [output, input]).convert::<B::FloatElem>(),
        device,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Tolerance;

    #[test]
    fn test_interpolation_matrix() {
        type B = NdArray<f32>;
        let device = Default::default();

        let m = interpolation_matrix::<B>(2, 4, &device);
        m.to_data().assert_approx_eq::<f32>(
            &TensorData::from([
                [1.0f32, 0.0],
                [0.75, 0.25],
                [0.25, 0.75],
                [0.0, 1.0],
            ]),
            Tolerance::default(),
        );

        let m = interpolation_matrix::<B>(4, 2, &device);
        m.to_data().assert_approx_eq::<f32>(
            &TensorData::from([[0.5f32, 0.5, 0.0, 0.0], [0.0, 0.0, 0.5, 0.5]]),
            Tolerance::default(),
        );

        let m = interpolation_matrix::<B>(1, 3, &device);
        m.to_data().assert_approx_eq::<f32>(
            &TensorData::from([[1.0f32], [1.0], [1.0]]),
            Tolerance::default(),
        );
    }

    #[test]
    fn test_resize_bilinear() {
        type B = NdArray<f32>;
        let device = Default::default();

        let input: Tensor<B, 4> = Tensor::ones([2, 3, 4, 5], &device);

        let same = resize_bilinear(input.clone(), [4, 5]);
        same.to_data().assert_eq(&input.to_data(), true);

        let up = resize_bilinear(input.clone(), [9, 11]);
        assert_eq!(up.dims(), [2, 3, 9, 11]);
        // a constant field stays constant.
        up.to_data().assert_approx_eq::<f32>(
            &Tensor::<B, 4>::ones([2, 3, 9, 11], &device).to_data(),
            Tolerance::default(),
        );
    }

    #[test]
    fn test_resize_bilinear_values() {
        type B = NdArray<f32>;
        let device = Default::default();

        // one channel holding a horizontal ramp, one a vertical ramp.
        let input: Tensor<B, 4> = Tensor::from_data(
            [[[[0.0f32, 2.0], [0.0, 2.0]], [[0.0, 0.0], [4.0, 4.0]]]],
            &device,
        );
        let output = resize_bilinear(input, [4, 3]);
        assert_eq!(output.dims(), [1, 2, 4, 3]);

        output.to_data().assert_approx_eq::<f32>(
            &TensorData::from([[
                [
                    [0.0f32, 1.0, 2.0],
                    [0.0, 1.0, 2.0],
                    [0.0, 1.0, 2.0],
                    [0.0, 1.0, 2.0],
                ],
                [
                    [0.0, 0.0, 0.0],
                    [1.0, 1.0, 1.0],
                    [3.0, 3.0, 3.0],
                    [4.0, 4.0, 4.0],
                ],
            ]]),
            Tolerance::default(),
        );
    }

    #[test]
    fn test_resize_bilinear_backward() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let input: Tensor<B, 4> = Tensor::ones([1, 2, 3, 4], &device).require_grad();
        let output = resize_bilinear(input.clone(), [7, 5]);
        let grads = output.sum().backward();

        let grad = input.grad(&grads).unwrap();
        assert_eq!(grad.dims(), [1, 2, 3, 4]);
        // every output sample distributes a total weight of one.
        let total = grad.sum().into_scalar();
        assert!((total - 2.0 * 7.0 * 5.0).abs() < 1e-3);
    }
}
