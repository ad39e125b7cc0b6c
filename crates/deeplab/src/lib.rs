#![warn(missing_docs)]
//!# deeplab - `DeepLabV3+` for Burn
//!
//! ## Notable Components
//!
//! * [`compat`] - layer abstraction wrappers.
//!   * [`compat::activation_wrapper::Activation`] - activation layer abstraction wrapper.
//!   * [`compat::normalization_wrapper::Normalization`] - norm layer abstraction wrapper.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::conv_norm_act`] - ``Conv2d + Norm + Act`` block.
//!   * [`layers::dense`] - linear layer with a configurable initializer.
//! * [`models`] - complete models.
//!   * [`models::resnet`] - the dilated `ResNet` backbone.
//!   * [`models::deeplab`] - `DeepLabV3+`, with an image-level classification head.
//! * [`training`] - the dual-branch training driver.
//! * [`utility`] - named config prefabs.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod compat;
pub mod layers;
pub mod models;
pub mod training;
pub mod utility;
