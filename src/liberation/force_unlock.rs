/// Cross-process release through the Restart Manager
///
/// Unlike the self-handle scan, this can close handles in, and terminate,
/// other processes that hold the file.
use crate::config::types::{LiberationError, Result};
use crate::kernel::restart_manager::{RestartManager, ShutdownOutcome};
use crate::kernel::RestartManagerApi;
use std::path::Path;

/// Force every other holder of `path` to release it.
///
/// Idempotent: when no process holds the file the Restart Manager answers
/// with its "nothing held" code, reported as [`ShutdownOutcome::NothingHeld`].
pub fn force_unlock_file<R: RestartManagerApi + ?Sized>(api: &R, path: &Path) -> Result<ShutdownOutcome> {
    let absolute = std::path::absolute(path).map_err(|source| LiberationError::PathResolution {
        path: path.to_path_buf(),
        source,
    })?;
    let resource = absolute.to_string_lossy();

    let session = RestartManager::new(api).open_session(&resource)?;
    let registered = session.register_resource(&resource)?;
    let (issued, outcome) = registered.force_shutdown(&resource)?;
    issued.end();

    match outcome {
        ShutdownOutcome::Released => log::info!("Restart Manager released {}", resource),
        ShutdownOutcome::NothingHeld => log::info!("No process held {}", resource),
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHandle, FakePlatform};

    const DB: &str = r"C:\data\db.sqlite";

    #[test]
    fn test_nothing_held_is_success_every_time() {
        let platform = FakePlatform::new(1);
        for _ in 0..3 {
            assert_eq!(
                force_unlock_file(&platform, Path::new(DB)).unwrap(),
                ShutdownOutcome::NothingHeld
            );
        }
        assert_eq!(platform.sessions_started(), 3);
        assert_eq!(platform.sessions_ended(), 3);
    }

    #[test]
    fn test_releases_foreign_holder() {
        let platform = FakePlatform::new(1).with_handle(FakeHandle::file(2, 0x20, DB));
        let outcome = force_unlock_file(&platform, Path::new(DB)).unwrap();
        assert_eq!(outcome, ShutdownOutcome::Released);
        assert!(!platform.is_open(2, 0x20));
        assert_eq!(platform.registered_paths().len(), 1);
        assert!(platform.registered_paths()[0].ends_with("db.sqlite"));
        assert_eq!(platform.sessions_ended(), 1);
    }

    #[test]
    fn test_every_failure_branch_ends_session_once() {
        let registration = FakePlatform::new(1).with_rm_register_error(87);
        assert!(matches!(
            force_unlock_file(&registration, Path::new(DB)),
            Err(LiberationError::ResourceRegistrationFailed { code: 87, .. })
        ));
        assert_eq!(registration.sessions_started(), 1);
        assert_eq!(registration.sessions_ended(), 1);

        let shutdown = FakePlatform::new(1).with_rm_shutdown_code(5);
        assert!(matches!(
            force_unlock_file(&shutdown, Path::new(DB)),
            Err(LiberationError::ForceShutdownFailed { code: 5, .. })
        ));
        assert_eq!(shutdown.sessions_started(), 1);
        assert_eq!(shutdown.sessions_ended(), 1);

        let start = FakePlatform::new(1).with_rm_start_error(1);
        match force_unlock_file(&start, Path::new(DB)) {
            Err(err @ LiberationError::SessionStartFailed { code: 1, .. }) => {
                assert!(err.to_string().ends_with(r"db.sqlite with error code: 1"));
            }
            other => panic!("expected SessionStartFailed, got {:?}", other),
        }
        assert_eq!(start.sessions_started(), 0);
        assert_eq!(start.sessions_ended(), 0);
    }

    #[test]
    fn test_empty_path_opens_no_session() {
        let platform = FakePlatform::new(1);
        assert!(matches!(
            force_unlock_file(&platform, Path::new("")),
            Err(LiberationError::PathResolution { .. })
        ));
        assert_eq!(platform.sessions_started(), 0);
    }
}
