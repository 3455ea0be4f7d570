//! Integration tests for the liberation flow
//!
//! These tests drive both strategies end to end against the in-memory
//! platform and check what each one may and may not touch.

use handlefree::config::settings::LiberationConfig;
use handlefree::kernel::handle_table::EntryLayout;
use handlefree::kernel::restart_manager::FORCED_REGISTERED_ONLY;
use handlefree::kernel::scanner::snapshot_handles;
use handlefree::testing::{FakeHandle, FakePlatform, QueryStep};
use handlefree::{HandleValue, LiberationError, Liberator, NtStatus, ShutdownOutcome};
use std::path::Path;

const DB: &str = r"C:\Users\me\AppData\app\db\MSG0.db";
const LOG: &str = r"C:\Users\me\AppData\app\db\MSG0.db-wal";
const OWN_PID: u32 = 100;
const OTHER_PID: u32 = 200;

fn busy_platform() -> FakePlatform {
    FakePlatform::new(OWN_PID)
        .with_handle(FakeHandle::file(OWN_PID, 0x40, DB))
        .with_handle(FakeHandle::file(OWN_PID, 0x44, DB))
        .with_handle(FakeHandle::file(OWN_PID, 0x48, LOG))
        .with_handle(FakeHandle::object(OWN_PID, 0x4C))
        .with_handle(FakeHandle::file(OTHER_PID, 0x40, DB))
        .with_handle(FakeHandle::file(OTHER_PID, 0x50, LOG))
}

#[test]
fn test_close_self_leaves_other_processes_alone() {
    let platform = busy_platform();
    let liberator = Liberator::new(&platform, LiberationConfig::default());

    let report = liberator.close_self_file_handles(Path::new(DB)).unwrap();

    assert_eq!(report.closed_count(), 2);
    assert_eq!(report.examined, 6);
    assert_eq!(report.own_handles, 4);
    assert_eq!(report.unresolved, 1);
    assert_eq!(platform.closed_handles(), vec![HandleValue(0x40), HandleValue(0x44)]);
    assert!(platform.is_open(OTHER_PID, 0x40));
    assert!(platform.is_open(OWN_PID, 0x48), "the -wal file is a different file");
    assert_eq!(platform.open_duplicates(), 0);
    assert_eq!(platform.sessions_started(), 0);
}

#[test]
fn test_liberate_frees_file_and_keeps_unrelated_handles() {
    let platform = busy_platform();
    let liberator = Liberator::new(&platform, LiberationConfig::default());

    let report = liberator.liberate(Path::new(DB)).unwrap();

    assert_eq!(report.self_handles_closed, 2);
    assert_eq!(report.shutdown, ShutdownOutcome::Released);
    assert!(platform.holders_of(DB).is_empty());
    assert!(platform.is_open(OWN_PID, 0x48));
    assert!(platform.is_open(OTHER_PID, 0x50));
    assert_eq!(platform.shutdown_flags(), vec![FORCED_REGISTERED_ONLY]);
    assert_eq!(platform.sessions_started(), platform.sessions_ended());
}

#[test]
fn test_liberate_is_idempotent() {
    let platform = busy_platform();
    let liberator = Liberator::new(&platform, LiberationConfig::default());

    liberator.liberate(Path::new(DB)).unwrap();
    let again = liberator.liberate(Path::new(DB)).unwrap();

    assert_eq!(again.self_handles_closed, 0);
    assert_eq!(again.shutdown, ShutdownOutcome::NothingHeld);
    assert_eq!(platform.sessions_ended(), 2);
}

#[test]
fn test_handles_opened_later_are_found() {
    let platform = FakePlatform::new(OWN_PID);
    let liberator = Liberator::new(&platform, LiberationConfig::default());

    assert!(matches!(
        liberator.close_self_file_handles(Path::new(DB)),
        Err(LiberationError::NoHandlesFound { .. })
    ));

    platform.open(FakeHandle::file(OWN_PID, 0x80, DB));
    let report = liberator.close_self_file_handles(Path::new(DB)).unwrap();
    assert_eq!(report.closed_count(), 1);
}

#[test]
fn test_snapshot_grows_through_short_buffers() {
    let handles = (0..2_000).map(|i| {
        let path = format!(r"C:\data\file{}.bin", i);
        FakeHandle::file(OWN_PID, 0x100 + i * 4, path)
    });
    let platform = FakePlatform::new(OWN_PID)
        .with_handles(handles)
        .with_handle(FakeHandle::file(OWN_PID, 0x9000, DB))
        .with_query_steps([QueryStep::TooSmall(4096), QueryStep::TooSmall(8192)]);

    let config = LiberationConfig {
        initial_buffer_bytes: 1024,
        ..LiberationConfig::default()
    };
    let liberator = Liberator::new(&platform, config);

    let report = liberator.close_self_file_handles(Path::new(DB)).unwrap();
    assert_eq!(report.closed_count(), 1);
    assert_eq!(report.examined, 2_001);

    let sizes = platform.query_buffer_sizes();
    assert!(sizes.len() >= 3);
    assert!(sizes.windows(2).all(|w| w[1] > w[0]), "buffer must grow: {:?}", sizes);
}

#[test]
fn test_scan_failure_leaves_everything_open() {
    let platform = busy_platform().with_query_steps([QueryStep::Fail(NtStatus::ACCESS_DENIED)]);
    let liberator = Liberator::new(&platform, LiberationConfig::default());

    let err = liberator.close_self_file_handles(Path::new(DB)).unwrap_err();
    assert!(err.to_string().contains("0xC0000022"));
    assert!(err.to_string().contains(r"msg0.db"));
    assert_eq!(platform.holders_of(DB).len(), 3);
}

#[test]
fn test_thirty_two_bit_layout() {
    let platform = busy_platform().with_layout(EntryLayout::for_pointer_width(4));
    let snapshot = snapshot_handles(&platform, &LiberationConfig::default(), DB).unwrap();
    assert_eq!(snapshot.layout().entry_len, 28);
    assert_eq!(snapshot.len(), 6);

    let liberator = Liberator::new(&platform, LiberationConfig::default());

    let report = liberator.close_self_file_handles(Path::new(DB)).unwrap();
    assert_eq!(report.closed_count(), 2);
}

#[test]
fn test_refused_close_is_counted_not_fatal() {
    let platform = busy_platform().with_refused_close(0x40);
    let liberator = Liberator::new(&platform, LiberationConfig::default());

    let report = liberator.close_self_file_handles(Path::new(DB)).unwrap();
    assert_eq!(report.closed_count(), 1);
    assert_eq!(report.close_failures, 1);
    assert!(platform.is_open(OWN_PID, 0x40));
}

#[test]
fn test_force_unlock_outcomes_always_end_session() {
    let registration = busy_platform().with_rm_register_error(87);
    let liberator = Liberator::new(&registration, LiberationConfig::default());
    assert!(matches!(
        liberator.force_unlock_file(Path::new(DB)),
        Err(LiberationError::ResourceRegistrationFailed { code: 87, .. })
    ));

    let shutdown = busy_platform().with_rm_shutdown_code(5);
    let liberator = Liberator::new(&shutdown, LiberationConfig::default());
    assert!(matches!(
        liberator.force_unlock_file(Path::new(DB)),
        Err(LiberationError::ForceShutdownFailed { code: 5, .. })
    ));

    let end = busy_platform().with_rm_end_code(6);
    let liberator = Liberator::new(&end, LiberationConfig::default());
    assert_eq!(
        liberator.force_unlock_file(Path::new(DB)).unwrap(),
        ShutdownOutcome::Released
    );

    for platform in [&registration, &shutdown, &end] {
        assert_eq!(platform.sessions_started(), 1);
        assert_eq!(platform.ended_session_handles().len(), 1);
    }
}
