//! # Dual-Branch Training
//!
//! * [`config`] - the persisted driver config.
//! * [`batch`] - synthetic batches.
//! * [`loss`] - soft-label cross-entropy and accuracy.
//! * [`trainer`] - one optimizer per branch.
//! * [`driver`] - the end-to-end driver loop.

pub mod batch;
pub mod config;
pub mod driver;
pub mod loss;
pub mod trainer;
