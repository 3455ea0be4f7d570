//! Configuration and shared types
//!
//! Error taxonomy, native status wrappers, and scanner tuning.

pub mod settings;
pub mod types;
