//! Thin wrappers around Windows kernel primitives.
//!
//! Every native entry point the subsystem needs sits behind [`HandleApi`] or
//! [`RestartManagerApi`]. Callers receive one platform object and pass it
//! down, so the same code runs against the real OS ([`windows`]) or against
//! [`crate::testing::FakePlatform`].
//!
//! All `unsafe` code is concentrated in [`windows`] and the buffer view in
//! [`handle_table`].

pub mod handle_table;
pub mod restart_manager;
pub mod scanner;
#[cfg(windows)]
pub mod windows;

use crate::config::types::{HandleValue, NtStatus, Result};
use handle_table::EntryLayout;

/// Handle-table and handle-object primitives of the current process
pub trait HandleApi {
    fn current_process_id(&self) -> u32;

    /// Record layout the query writes
    fn handle_table_layout(&self) -> EntryLayout {
        EntryLayout::native()
    }

    /// One system handle information query into `buffer`.
    /// Returns the status and the byte length the kernel reported.
    fn query_system_handles(&self, buffer: &mut [u8]) -> (NtStatus, u32);

    /// Duplicate a handle of this process with identical access rights
    fn duplicate_handle(&self, handle: HandleValue) -> std::io::Result<HandleValue>;

    /// Final path of the file object behind `handle`
    fn final_path_name(&self, handle: HandleValue) -> std::io::Result<String>;

    /// Close a handle of this process; `false` if the OS refused
    fn close_handle(&self, handle: HandleValue) -> bool;
}

/// Session identity returned by `RmStartSession`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionIdentity {
    pub handle: u32,
    pub key: String,
}

/// Restart Manager entry points. Return values are raw Win32 error codes.
pub trait RestartManagerApi {
    fn start_session(&self) -> std::result::Result<SessionIdentity, u32>;
    fn register_file(&self, session: u32, path: &str) -> u32;
    fn shutdown(&self, session: u32, flags: u32) -> u32;
    fn end_session(&self, session: u32) -> u32;
}

/// Everything the liberation flow needs from the OS
pub trait Platform: HandleApi + RestartManagerApi {}

impl<T: HandleApi + RestartManagerApi + ?Sized> Platform for T {}

impl<T: HandleApi + ?Sized> HandleApi for &T {
    fn current_process_id(&self) -> u32 {
        (**self).current_process_id()
    }

    fn handle_table_layout(&self) -> EntryLayout {
        (**self).handle_table_layout()
    }

    fn query_system_handles(&self, buffer: &mut [u8]) -> (NtStatus, u32) {
        (**self).query_system_handles(buffer)
    }

    fn duplicate_handle(&self, handle: HandleValue) -> std::io::Result<HandleValue> {
        (**self).duplicate_handle(handle)
    }

    fn final_path_name(&self, handle: HandleValue) -> std::io::Result<String> {
        (**self).final_path_name(handle)
    }

    fn close_handle(&self, handle: HandleValue) -> bool {
        (**self).close_handle(handle)
    }
}

impl<T: RestartManagerApi + ?Sized> RestartManagerApi for &T {
    fn start_session(&self) -> std::result::Result<SessionIdentity, u32> {
        (**self).start_session()
    }

    fn register_file(&self, session: u32, path: &str) -> u32 {
        (**self).register_file(session, path)
    }

    fn shutdown(&self, session: u32, flags: u32) -> u32 {
        (**self).shutdown(session, flags)
    }

    fn end_session(&self, session: u32) -> u32 {
        (**self).end_session(session)
    }
}

#[cfg(windows)]
pub type NativePlatform = windows::WindowsPlatform;

/// Placeholder on targets without the Windows APIs; it can never be built.
#[cfg(not(windows))]
#[derive(Debug)]
pub enum NativePlatform {}

#[cfg(not(windows))]
impl HandleApi for NativePlatform {
    fn current_process_id(&self) -> u32 {
        match *self {}
    }

    fn query_system_handles(&self, _buffer: &mut [u8]) -> (NtStatus, u32) {
        match *self {}
    }

    fn duplicate_handle(&self, _handle: HandleValue) -> std::io::Result<HandleValue> {
        match *self {}
    }

    fn final_path_name(&self, _handle: HandleValue) -> std::io::Result<String> {
        match *self {}
    }

    fn close_handle(&self, _handle: HandleValue) -> bool {
        match *self {}
    }
}

#[cfg(not(windows))]
impl RestartManagerApi for NativePlatform {
    fn start_session(&self) -> std::result::Result<SessionIdentity, u32> {
        match *self {}
    }

    fn register_file(&self, _session: u32, _path: &str) -> u32 {
        match *self {}
    }

    fn shutdown(&self, _session: u32, _flags: u32) -> u32 {
        match *self {}
    }

    fn end_session(&self, _session: u32) -> u32 {
        match *self {}
    }
}

/// Platform bound to the running OS
pub fn native_platform() -> Result<NativePlatform> {
    #[cfg(windows)]
    {
        Ok(windows::WindowsPlatform::new())
    }

    #[cfg(not(windows))]
    {
        Err(crate::config::types::LiberationError::Unsupported(format!(
            "handle liberation requires Windows (running on {})",
            std::env::consts::OS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(windows))]
    #[test]
    fn test_native_platform_unsupported_off_windows() {
        use crate::config::types::LiberationError;

        let err = native_platform().unwrap_err();
        assert!(matches!(err, LiberationError::Unsupported(_)));
    }

    #[cfg(windows)]
    #[test]
    fn test_native_platform_reports_own_pid() {
        let platform = native_platform().unwrap();
        assert_eq!(platform.current_process_id(), std::process::id());
    }
}
