//! # Dual-Branch Trainer
//!
//! [`DualBranchTrainer`] owns a [`DeepLabV3Plus`] model and two independent
//! optimizers; one for the classification branch, one for the segmentation
//! branch. Each step runs its own forward pass, loss, backward pass and
//! optimizer update. The backbone is shared, so both branches move it.
//!
//! Training steps normalize with batch statistics and update the running
//! statistics; [`DualBranchTrainer::evaluate`] runs the inference model,
//! which normalizes with the running statistics and updates nothing.

use crate::models::deeplab::DeepLabV3Plus;
use crate::training::batch::SyntheticBatch;
use crate::training::loss::{accuracy, pixel_rows, soft_cross_entropy};
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::{Backend, Tensor};
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

/// Metrics of one branch step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Mean loss over rows.
    pub loss: f64,

    /// Argmax accuracy over rows.
    pub accuracy: f64,
}

/// Trainer with one optimizer per branch.
pub struct DualBranchTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<DeepLabV3Plus<B>, B>,
{
    /// The model being trained.
    pub model: DeepLabV3Plus<B>,

    classification_optim: O,
    segmentation_optim: O,
    learning_rate: f64,
}

impl<B, O> DualBranchTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<DeepLabV3Plus<B>, B>,
{
    /// Create a trainer.
    pub fn new(
        model: DeepLabV3Plus<B>,
        classification_optim: O,
        segmentation_optim: O,
        learning_rate: f64,
    ) -> Self {
        Self {
            model,
            classification_optim,
            segmentation_optim,
            learning_rate,
        }
    }

    /// The learning rate of both optimizers.
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Score both branches without updating the model.
    ///
    /// Runs on the inner backend; no autodiff graph is recorded, and batch
    /// norm layers use their running statistics.
    pub fn evaluate(
        &self,
        batch: &SyntheticBatch<B>,
    ) -> (StepMetrics, StepMetrics) {
        let model = self.model.valid();
        let labels = batch.labels.clone().inner();

        let output = model.forward(batch.images.clone().inner());

        let classification = metrics(
            soft_cross_entropy(output.classification.clone(), labels.clone()),
            accuracy(output.classification, labels),
        );

        let logits = pixel_rows(output.segmentation);
        let targets = pixel_rows(batch.ground_truth.clone().inner());
        let segmentation = metrics(
            soft_cross_entropy(logits.clone(), targets.clone()),
            accuracy(logits, targets),
        );

        (classification, segmentation)
    }

    /// One classification-branch update.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn classification_step(
        &mut self,
        batch: &SyntheticBatch<B>,
    ) -> StepMetrics {
        let logits = self.model.classify(batch.images.clone());

        let loss = soft_cross_entropy(logits.clone(), batch.labels.clone());
        let acc = accuracy(logits, batch.labels.clone());

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self
            .classification_optim
            .step(self.learning_rate, self.model.clone(), grads);

        metrics(loss, acc)
    }

    /// One segmentation-branch update.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn segmentation_step(
        &mut self,
        batch: &SyntheticBatch<B>,
    ) -> StepMetrics {
        let output = self.model.forward(batch.images.clone());

        let logits = pixel_rows(output.segmentation);
        let targets = pixel_rows(batch.ground_truth.clone());

        let loss = soft_cross_entropy(logits.clone(), targets.clone());
        let acc = accuracy(logits, targets);

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self
            .segmentation_optim
            .step(self.learning_rate, self.model.clone(), grads);

        metrics(loss, acc)
    }
}

fn metrics<B: Backend>(
    loss: Tensor<B, 1>,
    accuracy: Tensor<B, 1>,
) -> StepMetrics {
    StepMetrics {
        loss: loss.into_scalar().elem::<f64>(),
        accuracy: accuracy.into_scalar().elem::<f64>(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::normalization_wrapper::Normalization;
    use crate::models::deeplab::DeepLabV3PlusConfig;
    use crate::models::resnet::backbone::ResNetBackboneContractConfig;
    use crate::training::config::TrainingConfig;
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::AdamConfig;
    use burn::tensor::TensorData;

    type B = Autodiff<NdArray<f32>>;

    fn tiny_config() -> TrainingConfig {
        TrainingConfig::new()
            .with_model(
                DeepLabV3PlusConfig::new(
                    4,
                    ResNetBackboneContractConfig::new(vec![1, 1, 1, 1, 1])
                        .with_stem_width(8)
                        .with_base_depth(2),
                )
                .with_aspp_channels(8)
                .with_decoder_channels(6)
                .with_low_level_channels(4)
                .with_aspp_rates(vec![1, 2]),
            )
            .with_batch_size(2)
            .with_image_size(16)
    }

    fn head_weight(model: &DeepLabV3Plus<B>) -> TensorData {
        model.head.linear.weight.val().to_data()
    }

    fn classifier_weight(model: &DeepLabV3Plus<B>) -> TensorData {
        model.decoder.classifier.conv.weight.val().to_data()
    }

    fn stem_weight(model: &DeepLabV3Plus<B>) -> TensorData {
        model.backbone.stem.cna.conv.weight.val().to_data()
    }

    fn stem_running_mean(model: &DeepLabV3Plus<B>) -> TensorData {
        match &model.backbone.stem.cna.norm {
            Some(Normalization::Batch(norm)) => norm.running_mean.value().to_data(),
            other => panic!("expected a batch norm, got {other:?}"),
        }
    }

    #[test]
    fn test_branch_steps_touch_their_own_parameters() {
        let device = Default::default();
        let config = tiny_config();

        let model: DeepLabV3Plus<B> = config.model.init(&device);
        let mut trainer = DualBranchTrainer::new(
            model,
            AdamConfig::new().init::<B, DeepLabV3Plus<B>>(),
            AdamConfig::new().init::<B, DeepLabV3Plus<B>>(),
            config.learning_rate,
        );
        let batch: SyntheticBatch<B> = SyntheticBatch::random(&config, &device);

        let head = head_weight(&trainer.model);
        let classifier = classifier_weight(&trainer.model);
        let stem = stem_weight(&trainer.model);

        let cls = trainer.classification_step(&batch);
        assert!(cls.loss.is_finite() && cls.loss > 0.0);
        assert!((0.0..=1.0).contains(&cls.accuracy));

        // the classification step moves the head and backbone; not the decoder.
        assert_ne!(head_weight(&trainer.model), head);
        assert_ne!(stem_weight(&trainer.model), stem);
        classifier_weight(&trainer.model).assert_eq(&classifier, true);

        let head = head_weight(&trainer.model);
        let stem = stem_weight(&trainer.model);

        let seg = trainer.segmentation_step(&batch);
        assert!(seg.loss.is_finite() && seg.loss > 0.0);
        assert!((0.0..=1.0).contains(&seg.accuracy));

        // the segmentation step moves the decoder and backbone; not the head.
        assert_ne!(classifier_weight(&trainer.model), classifier);
        assert_ne!(stem_weight(&trainer.model), stem);
        head_weight(&trainer.model).assert_eq(&head, true);
    }

    #[test]
    fn test_evaluate_does_not_update() {
        let device = Default::default();
        let config = tiny_config();

        let mut trainer = DualBranchTrainer::new(
            config.model.init::<B>(&device),
            AdamConfig::new().init::<B, DeepLabV3Plus<B>>(),
            AdamConfig::new().init::<B, DeepLabV3Plus<B>>(),
            config.learning_rate,
        );
        let batch: SyntheticBatch<B> = SyntheticBatch::random(&config, &device);

        let head = head_weight(&trainer.model);
        let running_mean = stem_running_mean(&trainer.model);

        let (cls, seg) = trainer.evaluate(&batch);
        assert!(cls.loss.is_finite());
        assert!((0.0..=1.0).contains(&cls.accuracy));
        assert!(seg.loss.is_finite());
        assert!((0.0..=1.0).contains(&seg.accuracy));

        head_weight(&trainer.model).assert_eq(&head, true);
        stem_running_mean(&trainer.model).assert_eq(&running_mean, true);
        assert_eq!(trainer.evaluate(&batch), (cls, seg));

        // a training step does move the running statistics.
        trainer.segmentation_step(&batch);
        assert_ne!(stem_running_mean(&trainer.model), running_mean);
        assert_eq!(trainer.learning_rate(), 1e-3);
    }
}
