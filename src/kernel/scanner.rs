/// Handle table capture
///
/// The size of the system handle table is unknown until the kernel is asked,
/// and it keeps changing while other processes run. The query is repeated
/// with a growing buffer until it fits, within the attempt and size caps of
/// [`LiberationConfig`].
use super::handle_table::{HandleTableSnapshot, QueryBuffer};
use super::HandleApi;
use crate::config::settings::LiberationConfig;
use crate::config::types::{LiberationError, Result};

/// Capture one system-wide handle snapshot.
///
/// `target` names what the scan is looking for and only appears in errors.
pub fn snapshot_handles<A: HandleApi + ?Sized>(
    api: &A,
    config: &LiberationConfig,
    target: &str,
) -> Result<HandleTableSnapshot> {
    let mut buffer_len = config.initial_buffer_bytes;

    for attempt in 1..=config.max_query_attempts {
        let mut buffer = QueryBuffer::zeroed(buffer_len);
        let (status, reported_len) = api.query_system_handles(buffer.as_bytes_mut());

        if status.is_success() {
            let snapshot = HandleTableSnapshot::from_buffer(buffer, api.handle_table_layout())?;
            log::debug!(
                "Captured {} handles ({} byte buffer, attempt {})",
                snapshot.len(),
                buffer_len,
                attempt
            );
            return Ok(snapshot);
        }

        if !status.is_buffer_too_small() {
            return Err(LiberationError::KernelQueryFailed {
                path: target.to_string(),
                status,
            });
        }

        let next_len = next_buffer_len(buffer_len, reported_len as usize, config.buffer_headroom_bytes);
        if next_len > config.max_buffer_bytes {
            return Err(LiberationError::SnapshotTooLarge {
                requested: next_len,
                limit: config.max_buffer_bytes,
            });
        }

        log::debug!(
            "Handle snapshot buffer too small ({} bytes, kernel wants {}), growing to {}",
            buffer_len,
            reported_len,
            next_len
        );
        buffer_len = next_len;
    }

    Err(LiberationError::SnapshotRetriesExhausted {
        attempts: config.max_query_attempts,
    })
}

/// Strictly larger than `current`, even when the kernel reports nothing useful
fn next_buffer_len(current: usize, reported: usize, headroom: usize) -> usize {
    reported
        .max(current)
        .saturating_add(headroom.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::NtStatus;
    use crate::testing::{FakeHandle, FakePlatform, QueryStep};

    const DB: &str = r"C:\data\db.sqlite";

    fn small_config() -> LiberationConfig {
        LiberationConfig {
            initial_buffer_bytes: 64,
            buffer_headroom_bytes: 32,
            max_query_attempts: 5,
            max_buffer_bytes: 1 << 20,
            verify_exclusive_access: false,
        }
    }

    #[test]
    fn test_growth_is_monotonic() {
        assert_eq!(next_buffer_len(100, 500, 10), 510);
        assert_eq!(next_buffer_len(100, 0, 10), 110);
        assert_eq!(next_buffer_len(100, 50, 0), 101);
    }

    #[test]
    fn test_too_small_twice_then_success() {
        let platform = FakePlatform::new(100)
            .with_handle(FakeHandle::file(100, 0x40, DB))
            .with_query_steps([QueryStep::TooSmall(4096), QueryStep::TooSmall(8192)]);

        let snapshot = snapshot_handles(&platform, &small_config(), DB).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(platform.query_calls(), 3);

        let sizes = platform.query_buffer_sizes();
        assert_eq!(sizes, vec![64, 4096 + 32, 8192 + 32]);
    }

    #[test]
    fn test_grows_from_kernel_reported_size() {
        let mut handles = Vec::new();
        for i in 0..50 {
            handles.push(FakeHandle::file(100, 4 * (i + 1), format!(r"C:\f{}.db", i)));
        }
        let platform = FakePlatform::new(100).with_handles(handles);

        let snapshot = snapshot_handles(&platform, &small_config(), DB).unwrap();
        assert_eq!(snapshot.len(), 50);
        assert_eq!(platform.query_calls(), 2);
    }

    #[test]
    fn test_other_status_fails_immediately() {
        let platform = FakePlatform::new(100)
            .with_query_steps([QueryStep::Fail(NtStatus::ACCESS_DENIED)]);

        match snapshot_handles(&platform, &small_config(), DB) {
            Err(LiberationError::KernelQueryFailed { path, status }) => {
                assert_eq!(status, NtStatus::ACCESS_DENIED);
                assert_eq!(path, DB);
            }
            other => panic!("expected KernelQueryFailed, got {:?}", other.err()),
        }
        assert_eq!(platform.query_calls(), 1);
    }

    #[test]
    fn test_attempt_cap_enforced() {
        let platform = FakePlatform::new(100).with_query_steps(
            std::iter::repeat(QueryStep::TooSmall(128)).take(10),
        );

        match snapshot_handles(&platform, &small_config(), DB) {
            Err(LiberationError::SnapshotRetriesExhausted { attempts }) => assert_eq!(attempts, 5),
            other => panic!("expected SnapshotRetriesExhausted, got {:?}", other.err()),
        }
        assert_eq!(platform.query_calls(), 5);
    }

    #[test]
    fn test_size_cap_enforced() {
        let platform = FakePlatform::new(100).with_query_steps([QueryStep::TooSmall(u32::MAX)]);

        match snapshot_handles(&platform, &small_config(), DB) {
            Err(LiberationError::SnapshotTooLarge { limit, .. }) => assert_eq!(limit, 1 << 20),
            other => panic!("expected SnapshotTooLarge, got {:?}", other.err()),
        }
        assert_eq!(platform.query_calls(), 1);
    }
}
