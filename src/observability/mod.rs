//! Observability
//!
//! Structured audit events for liberation operations.

pub mod audit;
