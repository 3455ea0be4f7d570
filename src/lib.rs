//! handlefree: releases every open handle on a locked file
//! Built for hosts that must read a database file another program keeps open
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::handle_table`]: System handle table decoding (bounds-checked views)
//! - [`kernel::scanner`]: Growing-buffer snapshot of the system handle table
//! - [`kernel::restart_manager`]: Type-state Restart Manager session
//! - `kernel::windows`: Native implementation of the platform traits (Windows only)
//!
//! ## Liberation ([`liberation`])
//! - [`liberation::resolver`]: Duplicate, resolve and match candidate handles
//! - [`liberation::self_handles`]: Close this process's own handles to a file
//! - [`liberation::force_unlock`]: Forced release of other holders
//! - [`liberation::verify`]: Exclusive-access check
//!
//! ## Workflow ([`workflow`])
//! - Pluggable decryption engine, run after the input has been liberated
//!
//! ## C ABI ([`ffi`])
//! - `ValidateKey`, `DecryptDatabase`, `ForceUnlockFile`, `CloseSelfFileHandles`, `FreeString`
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit events
//!
//! ## Configuration ([`config`])
//! - [`config::settings`]: Scanner limits with environment overrides
//! - [`config::types`]: Shared types and the error enum
//!
//! ## Utilities ([`utils`])
//! - [`utils::path_norm`]: Path normalization and suffix matching
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::fake_platform`]: In-memory handle table and Restart Manager
//!
//! # Design Principles
//!
//! 1. **Own process first** - Close our own handles before touching anyone else's
//! 2. **Sessions always end** - A started Restart Manager session is ended on every path
//! 3. **Types prevent errors** - Session steps cannot be reordered
//! 4. **Minimal unsafe** - Native calls and raw buffers live in two modules

// Kernel Primitives
pub mod kernel;

// Liberation strategies
pub mod liberation;

// Decryption workflow
pub mod workflow;

// C ABI exports
pub mod ffi;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for the handlefree binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::settings::LiberationConfig;
pub use config::types::*;
pub use kernel::restart_manager::ShutdownOutcome;
pub use kernel::{native_platform, HandleApi, Platform, RestartManagerApi};
pub use liberation::{CloseReport, LiberationReport, Liberator};
