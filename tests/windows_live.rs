//! Live tests against the real Windows kernel
//!
//! These open real files in the test process and release them through the
//! native platform. They never target files held by other processes.
#![cfg(windows)]

use handlefree::config::settings::LiberationConfig;
use handlefree::kernel::scanner::snapshot_handles;
use handlefree::liberation::verify::verify_exclusive_access;
use handlefree::{native_platform, HandleApi, LiberationError, Liberator, ShutdownOutcome};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::IntoRawHandle;

fn scratch_file() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locked.db");
    File::create(&path).unwrap().write_all(b"SQLite format 3\0").unwrap();
    (dir, path)
}

#[test]
fn test_snapshot_contains_own_handles() {
    let platform = native_platform().unwrap();
    let snapshot = snapshot_handles(&platform, &LiberationConfig::default(), "*").unwrap();
    let own = platform.current_process_id();
    assert!(snapshot.owned_by(own).count() > 0);
}

#[test]
fn test_close_self_releases_own_lock() {
    let (_dir, path) = scratch_file();

    // Leaked into a raw handle so the File never closes it a second time.
    let _raw = OpenOptions::new()
        .read(true)
        .share_mode(0)
        .open(&path)
        .unwrap()
        .into_raw_handle();
    assert!(!verify_exclusive_access(&path).unwrap());

    let liberator = Liberator::new(native_platform().unwrap(), LiberationConfig::default());
    let report = liberator.close_self_file_handles(&path).unwrap();

    assert!(report.closed_count() >= 1);
    assert!(verify_exclusive_access(&path).unwrap());
}

#[test]
fn test_close_self_without_handles() {
    let (_dir, path) = scratch_file();
    let liberator = Liberator::new(native_platform().unwrap(), LiberationConfig::default());
    assert!(matches!(
        liberator.close_self_file_handles(&path),
        Err(LiberationError::NoHandlesFound { .. })
    ));
}

#[test]
fn test_force_unlock_unheld_file() {
    let (_dir, path) = scratch_file();
    let liberator = Liberator::new(native_platform().unwrap(), LiberationConfig::default());
    let outcome = liberator.force_unlock_file(&path).unwrap();
    assert!(matches!(outcome, ShutdownOutcome::NothingHeld | ShutdownOutcome::Released));
}
