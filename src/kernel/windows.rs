//! Win32 / NT implementation of the platform traits.
//!
//! Each function is a direct call with its status checked by the caller;
//! nothing here retries or interprets results.

use super::handle_table::SYSTEM_EXTENDED_HANDLE_INFORMATION;
use super::{HandleApi, RestartManagerApi, SessionIdentity};
use crate::config::types::{HandleValue, NtStatus};
use std::ffi::c_void;
use windows_sys::Win32::Foundation::{
    CloseHandle, DuplicateHandle, DUPLICATE_SAME_ACCESS, ERROR_SUCCESS, HANDLE,
};
use windows_sys::Win32::Storage::FileSystem::{GetFinalPathNameByHandleW, FILE_NAME_NORMALIZED};
use windows_sys::Win32::System::RestartManager::{
    RmEndSession, RmRegisterResources, RmShutdown, RmStartSession, CCH_RM_SESSION_KEY,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, GetCurrentProcessId};

/// Enough for any `\\?\`-prefixed path the object manager hands back
const MAX_WIDE_PATH: usize = 32 * 1024;

#[link(name = "ntdll")]
extern "system" {
    fn NtQuerySystemInformation(
        system_information_class: u32,
        system_information: *mut c_void,
        system_information_length: u32,
        return_length: *mut u32,
    ) -> i32;
}

/// The running Windows system
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsPlatform {
    _private: (),
}

impl WindowsPlatform {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

fn as_handle(value: HandleValue) -> HANDLE {
    value.0 as HANDLE
}

impl HandleApi for WindowsPlatform {
    fn current_process_id(&self) -> u32 {
        // SAFETY: no arguments, cannot fail.
        unsafe { GetCurrentProcessId() }
    }

    fn query_system_handles(&self, buffer: &mut [u8]) -> (NtStatus, u32) {
        let length = u32::try_from(buffer.len()).unwrap_or(u32::MAX);
        let mut return_length: u32 = 0;

        // SAFETY: `buffer` is valid for writes of `length` bytes for the
        // duration of this synchronous call; `return_length` is a valid out
        // pointer.
        let status = unsafe {
            NtQuerySystemInformation(
                SYSTEM_EXTENDED_HANDLE_INFORMATION,
                buffer.as_mut_ptr().cast::<c_void>(),
                length,
                &mut return_length,
            )
        };

        (NtStatus(status as u32), return_length)
    }

    fn duplicate_handle(&self, handle: HandleValue) -> std::io::Result<HandleValue> {
        let mut duplicate: HANDLE = std::ptr::null_mut();

        // SAFETY: the pseudo-handle from GetCurrentProcess needs no closing.
        // Both source and target are this process, access is copied as-is.
        let ok = unsafe {
            let process = GetCurrentProcess();
            DuplicateHandle(
                process,
                as_handle(handle),
                process,
                &mut duplicate,
                0,
                0,
                DUPLICATE_SAME_ACCESS,
            )
        };

        if ok == 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(HandleValue(duplicate as usize))
    }

    fn final_path_name(&self, handle: HandleValue) -> std::io::Result<String> {
        let mut wide = vec![0u16; MAX_WIDE_PATH];

        // SAFETY: `wide` is a writable buffer of `wide.len()` u16s.
        let written = unsafe {
            GetFinalPathNameByHandleW(
                as_handle(handle),
                wide.as_mut_ptr(),
                wide.len() as u32,
                FILE_NAME_NORMALIZED,
            )
        } as usize;

        if written == 0 {
            return Err(std::io::Error::last_os_error());
        }
        if written >= wide.len() {
            // Return value is the required size, path did not fit.
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("final path needs {} characters", written),
            ));
        }

        Ok(String::from_utf16_lossy(&wide[..written]))
    }

    fn close_handle(&self, handle: HandleValue) -> bool {
        // SAFETY: closing an arbitrary value is at worst an error return.
        unsafe { CloseHandle(as_handle(handle)) != 0 }
    }
}

impl RestartManagerApi for WindowsPlatform {
    fn start_session(&self) -> std::result::Result<SessionIdentity, u32> {
        let mut session: u32 = 0;
        let mut key = [0u16; CCH_RM_SESSION_KEY as usize + 1];

        // SAFETY: `key` holds CCH_RM_SESSION_KEY + 1 characters as required.
        let code = unsafe { RmStartSession(&mut session, 0, key.as_mut_ptr()) };
        if code != ERROR_SUCCESS {
            return Err(code);
        }

        let key_len = key.iter().position(|c| *c == 0).unwrap_or(key.len());
        Ok(SessionIdentity {
            handle: session,
            key: String::from_utf16_lossy(&key[..key_len]),
        })
    }

    fn register_file(&self, session: u32, path: &str) -> u32 {
        let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
        let files = [wide.as_ptr()];

        // SAFETY: one NUL-terminated wide string, kept alive by `wide`; no
        // applications or services are registered.
        unsafe {
            RmRegisterResources(
                session,
                1,
                files.as_ptr(),
                0,
                std::ptr::null(),
                0,
                std::ptr::null(),
            )
        }
    }

    fn shutdown(&self, session: u32, flags: u32) -> u32 {
        // SAFETY: no status callback.
        unsafe { RmShutdown(session, flags, None) }
    }

    fn end_session(&self, session: u32) -> u32 {
        // SAFETY: plain value argument.
        unsafe { RmEndSession(session) }
    }
}
