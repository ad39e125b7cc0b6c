//! # Training Driver
//!
//! [`run_training`] wires the pieces together:
//! 1. seed the backend,
//! 2. build the model; this is the parameter-initialization pass,
//! 3. optionally restore a saved model record,
//! 4. run `max_iters` iterations of one classification step and one
//!    segmentation step, each on a fresh synthetic batch,
//! 5. optionally save the config, model record and report.
//!
//! [`run_driver`] keeps only the report; [`load_model`] reads a saved
//! record back.

use crate::models::deeplab::{DeepLabV3Plus, DeepLabV3PlusConfig};
use crate::training::batch::SyntheticBatch;
use crate::training::config::TrainingConfig;
use crate::training::trainer::{DualBranchTrainer, StepMetrics};
use anyhow::Context;
use burn::config::Config;
use burn::module::Module;
use burn::optim::AdamConfig;
use burn::record::CompactRecorder;
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the saved [`TrainingConfig`].
pub const CONFIG_FILE: &str = "config.json";

/// File stem of the saved model record; the recorder adds the extension.
pub const MODEL_FILE: &str = "model";

/// File name of the saved [`DriverReport`].
pub const REPORT_FILE: &str = "report.json";

/// Driver side options; not part of the persisted config.
#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    /// Model record to restore before training; as passed to `save_file`.
    pub restore: Option<PathBuf>,

    /// Directory to write the config, model record and report to.
    pub artifact_dir: Option<PathBuf>,

    /// Score both branches on a fresh batch after training.
    pub evaluate: bool,
}

/// Driver result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverReport {
    /// Number of model parameters.
    pub num_params: usize,

    /// Completed iterations.
    pub iterations: usize,

    /// Classification-branch metrics, per iteration.
    pub classification: Vec<StepMetrics>,

    /// Segmentation-branch metrics, per iteration.
    pub segmentation: Vec<StepMetrics>,

    /// Post-training ``(classification, segmentation)`` metrics, when requested.
    pub evaluation: Option<(StepMetrics, StepMetrics)>,
}

/// A finished driver run.
#[derive(Debug)]
pub struct DriverRun<B: AutodiffBackend> {
    /// The trained model.
    pub model: DeepLabV3Plus<B>,

    /// The run report.
    pub report: DriverReport,
}

/// Run the dual-branch training driver; see [`run_training`].
pub fn run_driver<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: &B::Device,
    options: &DriverOptions,
) -> anyhow::Result<DriverReport> {
    run_training::<B>(config, device, options).map(|run| run.report)
}

/// Load a model record saved by the driver.
///
/// # Arguments
///
/// - `config`: the model config the record was saved from.
/// - `path`: the record path, as passed to `save_file`.
pub fn load_model<B: Backend>(
    config: &DeepLabV3PlusConfig,
    path: &Path,
    device: &B::Device,
) -> anyhow::Result<DeepLabV3Plus<B>> {
    config
        .init::<B>(device)
        .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
        .map_err(|err| anyhow::anyhow!("{err:?}"))
        .with_context(|| format!("failed to restore model from {}", path.display()))
}

/// Run the dual-branch training driver, keeping the trained model.
pub fn run_training<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: &B::Device,
    options: &DriverOptions,
) -> anyhow::Result<DriverRun<B>> {
    config
        .try_validate()
        .map_err(|err| anyhow::anyhow!("invalid training config: {err}"))?;

    B::seed(config.seed);

    let mut model: DeepLabV3Plus<B> = config.model.init(device);
    let num_params = model.num_params();
    info!(
        num_params,
        num_classes = config.num_classes(),
        layers = ?config.model.backbone.layers,
        "model initialized"
    );

    if let Some(path) = &options.restore {
        model = model
            .load_file(path.clone(), &CompactRecorder::new(), device)
            .map_err(|err| anyhow::anyhow!("{err:?}"))
            .with_context(|| format!("failed to restore model from {}", path.display()))?;
        info!(path = %path.display(), "model restored");
    }

    let mut trainer = DualBranchTrainer::new(
        model,
        AdamConfig::new().init::<B, DeepLabV3Plus<B>>(),
        AdamConfig::new().init::<B, DeepLabV3Plus<B>>(),
        config.learning_rate,
    );

    let mut report = DriverReport {
        num_params,
        iterations: 0,
        classification: Vec::with_capacity(config.max_iters),
        segmentation: Vec::with_capacity(config.max_iters),
        evaluation: None,
    };

    for iter in 0..config.max_iters {
        let batch = SyntheticBatch::random(config, device);
        let cls = trainer.classification_step(&batch);

        let batch = SyntheticBatch::random(config, device);
        let seg = trainer.segmentation_step(&batch);

        info!(
            iter,
            cls_loss = cls.loss,
            cls_acc = cls.accuracy,
            seg_loss = seg.loss,
            seg_acc = seg.accuracy,
            "step"
        );

        report.classification.push(cls);
        report.segmentation.push(seg);
        report.iterations += 1;
    }

    if options.evaluate {
        let batch = SyntheticBatch::random(config, device);
        let (cls, seg) = trainer.evaluate(&batch);
        info!(
            cls_loss = cls.loss,
            cls_acc = cls.accuracy,
            seg_loss = seg.loss,
            seg_acc = seg.accuracy,
            "evaluation"
        );
        report.evaluation = Some((cls, seg));
    }

    if let Some(dir) = &options.artifact_dir {
        save_artifacts(dir, config, trainer.model.clone(), &report)?;
    }

    Ok(DriverRun {
        model: trainer.model,
        report,
    })
}

fn save_artifacts<B: AutodiffBackend>(
    dir: &Path,
    config: &TrainingConfig,
    model: DeepLabV3Plus<B>,
    report: &DriverReport,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create artifact dir {}", dir.display()))?;

    config
        .save(dir.join(CONFIG_FILE))
        .with_context(|| format!("failed to save {CONFIG_FILE}"))?;

    model
        .save_file(dir.join(MODEL_FILE), &CompactRecorder::new())
        .map_err(|err| anyhow::anyhow!("{err:?}"))
        .with_context(|| format!("failed to save model record to {}", dir.display()))?;

    let report_json = serde_json::to_string_pretty(report)?;
    std::fs::write(dir.join(REPORT_FILE), report_json)
        .with_context(|| format!("failed to save {REPORT_FILE}"))?;

    debug!(dir = %dir.display(), "artifacts saved");
    Ok(())
}
