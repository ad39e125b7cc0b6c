//! # Training Driver Config

use crate::models::deeplab::DeepLabV3PlusConfig;
use burn::config::Config;

/// Dual-branch training driver config.
///
/// Persisted as JSON with [`Config::save`] / [`Config::load`].
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// The model; carries the class count.
    #[config(default = "DeepLabV3PlusConfig::resnet_50(80)")]
    pub model: DeepLabV3PlusConfig,

    /// Images per batch.
    #[config(default = 16)]
    pub batch_size: usize,

    /// Square input image size.
    #[config(default = 224)]
    pub image_size: usize,

    /// Learning rate of both optimizers.
    #[config(default = 1e-3)]
    pub learning_rate: f64,

    /// Training iterations; one step per branch each.
    #[config(default = 0)]
    pub max_iters: usize,

    /// Backend RNG seed.
    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    /// The number of classes.
    pub fn num_classes(&self) -> usize {
        self.model.num_classes
    }

    /// Set the number of classes.
    pub fn with_num_classes(
        self,
        num_classes: usize,
    ) -> Self {
        Self {
            model: DeepLabV3PlusConfig {
                num_classes,
                ..self.model
            },
            ..self
        }
    }

    /// The ``[batch, channels, height, width]`` input shape.
    pub fn image_shape(&self) -> [usize; 4] {
        [
            self.batch_size,
            self.model.backbone.in_channels,
            self.image_size,
            self.image_size,
        ]
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be positive".to_string());
        }
        if self.image_size == 0 {
            return Err("image_size must be positive".to_string());
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(format!(
                "learning_rate must be positive: {}",
                self.learning_rate
            ));
        }
        self.model.try_validate()
    }
}
