//! # Utility
pub mod prefabs;
