//! # Models
//!
//! * [`resnet`] - the dilated `ResNet` backbone.
//! * [`deeplab`] - `DeepLabV3+` over the backbone.

pub mod deeplab;
pub mod resnet;
