//! # Dilated `ResNet`
//!
//! A bottleneck `ResNet` whose last two stages trade striding for dilation;
//! the high-level features stay at stride 8 for the standard tables.

pub mod atrous_block;
pub mod backbone;
pub mod prefabs;
pub mod residual_block;
pub mod stage;
pub mod stem;
