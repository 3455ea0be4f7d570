//! Utilities
//!
//! Path canonicalization shared by the scanner and the session controller.

pub mod path_norm;
