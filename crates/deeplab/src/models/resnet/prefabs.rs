//! # Backbone Prefabs
//!
//! Well-known [`ResNetBackboneContractConfig`]s, by name.
//!
//! Prefabs carry no classification head; set one with
//! [`ResNetBackboneContractConfig::with_dense_out`].

use crate::models::resnet::backbone::{
    RESNET50_BLOCKS, RESNET101_BLOCKS, ResNetBackboneContractConfig,
    ResNetBackboneStructureConfig,
};
use crate::utility::prefabs::{PreFabConfig, PreFabMap, StaticPreFabConfig};

/// Static builder for [`BackbonePreFabContractConfig`].
pub type StaticBackbonePreFabContractConfig = StaticPreFabConfig<ResNetBackboneContractConfig>;

/// A [`ResNetBackboneContractConfig`] well-known prefab.
pub type BackbonePreFabContractConfig = PreFabConfig<ResNetBackboneContractConfig>;

/// A [`ResNetBackboneStructureConfig`] well-known prefab.
pub type BackbonePreFabStructureConfig = PreFabConfig<ResNetBackboneStructureConfig>;

/// Dilated ResNet-50.
pub static RESNET50_PREFAB: StaticBackbonePreFabContractConfig = StaticPreFabConfig {
    name: "resnet50",
    description: "Dilated ResNet-50 backbone; output stride 8",
    builder: || ResNetBackboneContractConfig::new(RESNET50_BLOCKS.to_vec()),
};

/// Dilated ResNet-101.
pub static RESNET101_PREFAB: StaticBackbonePreFabContractConfig = StaticPreFabConfig {
    name: "resnet101",
    description: "Dilated ResNet-101 backbone; output stride 8",
    builder: || ResNetBackboneContractConfig::new(RESNET101_BLOCKS.to_vec()),
};

/// All backbone prefabs.
pub static PREFAB_BACKBONE_MAP: PreFabMap<ResNetBackboneContractConfig> = PreFabMap {
    name: "backbone",
    items: &[&RESNET50_PREFAB, &RESNET101_PREFAB],
};

impl BackbonePreFabContractConfig {
    /// Convert to a [`BackbonePreFabStructureConfig`].
    pub fn to_structure_prefab(&self) -> BackbonePreFabStructureConfig {
        self.map(|config| config.to_structure())
    }
}

impl From<&StaticBackbonePreFabContractConfig> for BackbonePreFabStructureConfig {
    fn from(config: &StaticBackbonePreFabContractConfig) -> Self {
        config.to_prefab().to_structure_prefab()
    }
}
