//! # Losses and Metrics
//!
//! Both branches are scored against probability targets, one distribution
//! per row. Dense predictions are flattened to rows with [`pixel_rows`].

use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::log_softmax;

/// Softmax cross-entropy against probability targets, averaged over rows.
///
/// ```text
/// mean_i( -sum_c targets[i, c] * log_softmax(logits)[i, c] )
/// ```
///
/// # Arguments
///
/// - `logits`: ``[rows, classes]``.
/// - `targets`: ``[rows, classes]``; each row sums to 1.
///
/// # Returns
///
/// A ``[1]`` tensor.
pub fn soft_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    assert_eq!(
        logits.dims(),
        targets.dims(),
        "logits and targets must have the same shape"
    );
    let log_probs = log_softmax(logits, 1);
    (targets * log_probs).sum_dim(1).neg().mean()
}

/// Fraction of rows where the argmax of `logits` equals the argmax of `targets`.
///
/// # Returns
///
/// A ``[1]`` tensor in ``[0, 1]``.
pub fn accuracy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    logits
        .argmax(1)
        .equal(targets.argmax(1))
        .float()
        .mean()
}

/// Flatten a channels-first dense map into per-pixel rows.
///
/// ``[batch, classes, height, width] -> [batch * height * width, classes]``;
/// rows are ordered batch-major, then row-major over pixels.
pub fn pixel_rows<B: Backend>(input: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, classes, height, width] = input.dims();
    input
        .permute([0, 2, 3, 1])
        .reshape([batch * height * width, classes])
}
