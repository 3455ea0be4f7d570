/// In-process handle closer
///
/// Scans the system handle table, keeps only this process's entries, resolves
/// them and closes every original handle whose path matches the target.
/// Nothing outside the current process is touched.
use super::resolver::CandidateWalk;
use crate::config::settings::LiberationConfig;
use crate::config::types::{HandleValue, LiberationError, Result};
use crate::kernel::scanner::snapshot_handles;
use crate::kernel::HandleApi;
use crate::utils::path_norm::NormalizedPath;
use serde::Serialize;
use std::path::Path;

/// What one scan saw and did
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    /// Normalized target
    pub target: String,
    /// Records in the snapshot, all processes
    pub examined: usize,
    /// Records owned by this process
    pub own_handles: usize,
    /// Own records that could not be resolved to a path
    pub unresolved: usize,
    /// Original handle values that were closed
    pub closed: Vec<HandleValue>,
    /// Matches whose close was refused
    pub close_failures: usize,
}

impl CloseReport {
    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }
}

/// Close every handle of this process that refers to `path`.
///
/// Fails with [`LiberationError::NoHandlesFound`] when nothing was closed.
pub fn close_self_file_handles<A: HandleApi + ?Sized>(
    api: &A,
    config: &LiberationConfig,
    path: &Path,
) -> Result<CloseReport> {
    let target = NormalizedPath::resolve(path)?;
    let snapshot = snapshot_handles(api, config, target.as_str())?;

    let mut report = CloseReport {
        target: target.to_string(),
        examined: snapshot.len(),
        ..CloseReport::default()
    };

    let mut walk = CandidateWalk::new(api, snapshot.iter());
    for candidate in walk.by_ref() {
        if !candidate.path.is_equivalent(&target) {
            continue;
        }

        let handle = candidate.entry.handle_value;
        if api.close_handle(handle) {
            log::info!("Closed handle {} on {}", handle, candidate.path);
            report.closed.push(handle);
        } else {
            log::warn!("CloseHandle refused handle {} on {}", handle, candidate.path);
            report.close_failures += 1;
        }
    }
    report.own_handles = walk.own_handles;
    report.unresolved = walk.unresolved;

    log::debug!(
        "Handle scan for {}: {} examined, {} own, {} unresolved, {} closed",
        report.target,
        report.examined,
        report.own_handles,
        report.unresolved,
        report.closed_count()
    );

    if report.closed.is_empty() {
        return Err(LiberationError::NoHandlesFound {
            path: path.display().to_string(),
        });
    }
    Ok(report)
}
