/// Exclusive-access check
use crate::config::types::{LiberationError, Result};
use std::fs::OpenOptions;
use std::path::Path;

/// `ERROR_SHARING_VIOLATION`
#[cfg(windows)]
const ERROR_SHARING_VIOLATION: i32 = 32;
/// `ERROR_LOCK_VIOLATION`
#[cfg(windows)]
const ERROR_LOCK_VIOLATION: i32 = 33;

/// Try to open `path` for reading with no sharing allowed.
///
/// `Ok(true)` when the open succeeds, `Ok(false)` when another handle still
/// blocks it. Other targets have no share modes; there only openability is
/// checked.
pub fn verify_exclusive_access(path: &Path) -> Result<bool> {
    let mut options = OpenOptions::new();
    options.read(true);

    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        options.share_mode(0);
    }

    match options.open(path) {
        Ok(_) => Ok(true),
        #[cfg(windows)]
        Err(e) if matches!(e.raw_os_error(), Some(ERROR_SHARING_VIOLATION | ERROR_LOCK_VIOLATION)) => {
            log::debug!("{} is still held by another handle: {}", path.display(), e);
            Ok(false)
        }
        Err(e) => Err(LiberationError::Io(e)),
    }
}
