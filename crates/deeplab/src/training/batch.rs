//! # Synthetic Batches
//!
//! The driver has no dataset; it feeds random images with random
//! probability-distribution targets of the right shapes.

use crate::training::config::TrainingConfig;
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;
use burn::tensor::activation::softmax;

/// One training batch for both branches.
#[derive(Debug, Clone)]
pub struct SyntheticBatch<B: Backend> {
    /// ``[batch, channels, height, width]`` images.
    pub images: Tensor<B, 4>,

    /// ``[batch, num_classes]`` image-level class distributions.
    pub labels: Tensor<B, 2>,

    /// ``[batch, num_classes, height, width]`` per-pixel class distributions.
    pub ground_truth: Tensor<B, 4>,
}

impl<B: Backend> SyntheticBatch<B> {
    /// Sample a batch shaped by `config`.
    ///
    /// Labels and ground truth are detached; no gradient flows into them.
    pub fn random(
        config: &TrainingConfig,
        device: &B::Device,
    ) -> Self {
        let [batch, channels, height, width] = config.image_shape();
        let num_classes = config.num_classes();

        let images = Tensor::random(
            [batch, channels, height, width],
            Distribution::Normal(0.0, 1.0),
            device,
        );

        let labels = softmax(
            Tensor::random([batch, num_classes], Distribution::Normal(0.0, 1.0), device),
            1,
        )
        .detach();

        let ground_truth = softmax(
            Tensor::random(
                [batch, num_classes, height, width],
                Distribution::Normal(0.0, 1.0),
                device,
            ),
            1,
        )
        .detach();

        Self {
            images,
            labels,
            ground_truth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deeplab::DeepLabV3PlusConfig;
    use crate::models::resnet::backbone::ResNetBackboneContractConfig;
    use burn::backend::NdArray;
    use burn::tensor::Tolerance;

    #[test]
    fn test_random_batch() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = TrainingConfig::new()
            .with_model(DeepLabV3PlusConfig::new(
                5,
                ResNetBackboneContractConfig::resnet_50(0),
            ))
            .with_batch_size(2)
            .with_image_size(6);

        let batch: SyntheticBatch<B> = SyntheticBatch::random(&config, &device);
        assert_eq!(batch.images.dims(), [2, 3, 6, 6]);
        assert_eq!(batch.labels.dims(), [2, 5]);
        assert_eq!(batch.ground_truth.dims(), [2, 5, 6, 6]);

        // rows are probability distributions.
        batch
            .labels
            .clone()
            .sum_dim(1)
            .to_data()
            .assert_approx_eq::<f32>(
                &Tensor::<B, 2>::ones([2, 1], &device).to_data(),
                Tolerance::default(),
            );
        batch
            .ground_truth
            .clone()
            .sum_dim(1)
            .to_data()
            .assert_approx_eq::<f32>(
                &Tensor::<B, 4>::ones([2, 1, 6, 6], &device).to_data(),
                Tolerance::default(),
            );
        assert!(batch.labels.min().into_scalar() >= 0.0);
    }
}
