use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use burn::tensor::backend::AutodiffBackend;
use clap::Parser;
use deeplab::models::resnet::prefabs::PREFAB_BACKBONE_MAP;
use deeplab::training::config::TrainingConfig;
use deeplab::training::driver::{DriverOptions, run_driver};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// $ --num-classes=21 --max-iters=2 --batch-size=2 --image-size=64 --artifact-dir=/tmp/deeplab
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON training config to start from; defaults otherwise.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backbone prefab name.
    #[arg(long)]
    backbone: Option<String>,

    /// Number of classes.
    #[arg(long)]
    num_classes: Option<usize>,

    /// Batch size.
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Square input image size.
    #[arg(long)]
    image_size: Option<usize>,

    /// Training iterations.
    #[arg(long)]
    max_iters: Option<usize>,

    /// Learning rate for both optimizers.
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Random seed for reproducibility.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Model record to restore before training.
    #[arg(long)]
    restore: Option<PathBuf>,

    /// Directory to save the artifacts.
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Score both branches after training.
    #[arg(long, default_value_t = false)]
    evaluate: bool,
}

impl Args {
    /// Build the training config; flags override the loaded file.
    fn training_config(&self) -> anyhow::Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)
                .map_err(|err| anyhow::anyhow!("failed to load {}: {err}", path.display()))?,
            None => TrainingConfig::new(),
        };

        if let Some(name) = &self.backbone {
            config.model.backbone = PREFAB_BACKBONE_MAP.expect_lookup(name)?.new_config();
        }
        if let Some(num_classes) = self.num_classes {
            config = config.with_num_classes(num_classes);
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(image_size) = self.image_size {
            config.image_size = image_size;
        }
        if let Some(max_iters) = self.max_iters {
            config.max_iters = max_iters;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        Ok(config)
    }

    fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            restore: self.restore.clone(),
            artifact_dir: self.artifact_dir.clone(),
            evaluate: self.evaluate,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    type B = Autodiff<NdArray>;

    backend_main::<B>(&args, Default::default())
}

/// Run the driver on the given backend and device.
pub fn backend_main<B: AutodiffBackend>(
    args: &Args,
    device: B::Device,
) -> anyhow::Result<()> {
    let config = args.training_config()?;
    tracing::info!(config = %config, "training config");

    let report = run_driver::<B>(&config, &device, &args.driver_options())?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
