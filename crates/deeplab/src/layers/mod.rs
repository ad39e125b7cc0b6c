//! Common low-level modules for building models in Burn.
pub mod conv_norm_act;
pub mod conv_shape;
pub mod dense;
