//! # Compat
//!
//! Layer abstraction wrappers; config enums over the ``burn`` layer families
//! so that blocks can be parameterized by policy.

pub mod activation_wrapper;
pub mod normalization_wrapper;
