//! File-handle liberation
//!
//! Two escalating strategies for freeing a locked file:
//! 1. [`self_handles`]: close this process's own handles to the file.
//! 2. [`force_unlock`]: ask the Restart Manager to make every other holder
//!    let go, terminating it if needed.
//!
//! [`Liberator`] binds both to one platform object and one configuration.

pub mod force_unlock;
pub mod resolver;
pub mod self_handles;
pub mod verify;

use crate::config::settings::LiberationConfig;
use crate::config::types::{LiberationError, Result};
use crate::kernel::restart_manager::ShutdownOutcome;
use crate::kernel::Platform;
use crate::observability::audit::{AuditEvent, Operation, Outcome};
use serde::Serialize;
use std::path::Path;

pub use self_handles::CloseReport;

/// Result of the full escalation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LiberationReport {
    /// Own handles closed by the first strategy; zero when none matched
    pub self_handles_closed: usize,
    pub shutdown: ShutdownOutcome,
    /// Set when exclusive access was checked afterwards
    pub exclusive_access: Option<bool>,
}

/// Entry point for both strategies
pub struct Liberator<P> {
    platform: P,
    config: LiberationConfig,
}

impl<P: Platform> Liberator<P> {
    pub fn new(platform: P, config: LiberationConfig) -> Self {
        Self { platform, config }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &LiberationConfig {
        &self.config
    }

    /// Strategy (a): close this process's handles to `path`
    pub fn close_self_file_handles(&self, path: &Path) -> Result<CloseReport> {
        let result = self_handles::close_self_file_handles(&self.platform, &self.config, path);

        let event = AuditEvent::new(Operation::CloseSelfHandles, path, Outcome::Released);
        match &result {
            Ok(report) => event.with_closed(report.closed_count()).emit(),
            Err(LiberationError::NoHandlesFound { .. }) => {
                AuditEvent::new(Operation::CloseSelfHandles, path, Outcome::NothingHeld)
                    .with_closed(0)
                    .emit()
            }
            Err(e) => event.with_error(e).emit(),
        }
        result
    }

    /// Strategy (b): force every other holder of `path` to release it
    pub fn force_unlock_file(&self, path: &Path) -> Result<ShutdownOutcome> {
        let result = force_unlock::force_unlock_file(&self.platform, path);

        match &result {
            Ok(outcome) => AuditEvent::new(Operation::ForceUnlock, path, outcome_of(*outcome)).emit(),
            Err(e) => AuditEvent::new(Operation::ForceUnlock, path, Outcome::Failed)
                .with_error(e)
                .emit(),
        }
        result
    }

    /// Run (a) then (b). Finding no own handles is expected and does not stop
    /// the escalation; any other failure does.
    pub fn liberate(&self, path: &Path) -> Result<LiberationReport> {
        let self_handles_closed = match self.close_self_file_handles(path) {
            Ok(report) => report.closed_count(),
            Err(LiberationError::NoHandlesFound { .. }) => 0,
            Err(e) => return Err(e),
        };

        let shutdown = self.force_unlock_file(path)?;

        let exclusive_access = if self.config.verify_exclusive_access {
            Some(verify::verify_exclusive_access(path)?)
        } else {
            None
        };

        let report = LiberationReport {
            self_handles_closed,
            shutdown,
            exclusive_access,
        };

        let outcome = if self_handles_closed > 0 {
            Outcome::Released
        } else {
            outcome_of(shutdown)
        };
        AuditEvent::new(Operation::Liberate, path, outcome)
            .with_closed(self_handles_closed)
            .emit();

        Ok(report)
    }
}

fn outcome_of(shutdown: ShutdownOutcome) -> Outcome {
    match shutdown {
        ShutdownOutcome::Released => Outcome::Released,
        ShutdownOutcome::NothingHeld => Outcome::NothingHeld,
    }
}
