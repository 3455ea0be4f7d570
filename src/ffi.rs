//! C ABI exports
//!
//! Every export that can fail returns a null pointer on success and a
//! heap-allocated, NUL-terminated UTF-8 message on failure. The caller owns
//! that message and must hand it back to `FreeString` exactly once.
//!
//! # Safety Design
//!
//! - Pointer arguments are checked for null and UTF-8 before use.
//! - Panics never cross the boundary; they are caught and reported as
//!   error strings.
//! - Returned strings come from [`CString::into_raw`] and are only ever
//!   reclaimed by [`CString::from_raw`] in `FreeString`.

use crate::config::settings::LiberationConfig;
use crate::config::types::{LiberationError, Result};
use crate::kernel::{native_platform, Platform};
use crate::liberation::Liberator;
use crate::workflow::{self, CancellationToken, DecryptionEngine};
use std::ffi::{c_char, c_int, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::OnceLock;

static ENGINE: OnceLock<Box<dyn DecryptionEngine>> = OnceLock::new();

/// Install the cipher used by `ValidateKey` and `DecryptDatabase`.
///
/// Only the first installation takes effect; later ones are handed back.
pub fn install_decryption_engine(
    engine: Box<dyn DecryptionEngine>,
) -> std::result::Result<(), Box<dyn DecryptionEngine>> {
    ENGINE.set(engine)
}

fn engine() -> Result<&'static dyn DecryptionEngine> {
    ENGINE
        .get()
        .map(|engine| engine.as_ref())
        .ok_or_else(|| LiberationError::Engine("no decryption engine installed".to_string()))
}

/// # Safety
/// `ptr` is null or points to a NUL-terminated string valid for the call.
unsafe fn arg<'a>(ptr: *const c_char, name: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(LiberationError::InvalidArgument(format!("{} is null", name)));
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| LiberationError::InvalidArgument(format!("{} is not UTF-8: {}", name, e)))
}

fn error_string(message: String) -> *mut c_char {
    let sanitized = message.replace('\0', " ");
    match CString::new(sanitized) {
        Ok(s) => s.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `op` and map its outcome onto the null-or-message convention
fn guarded<F>(name: &str, op: F) -> *mut c_char
where
    F: FnOnce() -> Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(op)) {
        Ok(Ok(())) => std::ptr::null_mut(),
        Ok(Err(e)) => error_string(e.to_string()),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!("{} panicked: {}", name, message);
            error_string(format!("{} panicked: {}", name, message))
        }
    }
}

fn native_liberator() -> Result<Liberator<crate::kernel::NativePlatform>> {
    let config = LiberationConfig::from_env()?;
    Ok(Liberator::new(native_platform()?, config))
}

/// Decrypt even when no liberator could be built for this call
fn decrypt_best_effort<P: Platform>(
    liberator: Result<Liberator<P>>,
    engine: &dyn DecryptionEngine,
    input: &Path,
    output: &Path,
    hex_key: &str,
) -> Result<()> {
    let liberator = match liberator {
        Ok(liberator) => Some(liberator),
        Err(e) => {
            log::warn!("Cannot liberate {} before decryption: {}", input.display(), e);
            None
        }
    };
    workflow::decrypt_database(
        liberator.as_ref(),
        engine,
        input,
        output,
        hex_key,
        &CancellationToken::new(),
    )
}

/// Returns 1 when `hex_key` decrypts the first page of `db_path`, else 0.
///
/// # Safety
/// Both arguments are null or valid NUL-terminated strings.
#[export_name = "ValidateKey"]
pub unsafe extern "C" fn validate_key(db_path: *const c_char, hex_key: *const c_char) -> c_int {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<bool> {
        let path = arg(db_path, "db_path")?;
        let key = arg(hex_key, "hex_key")?;
        Ok(workflow::validate_key(engine()?, Path::new(path), key))
    }));

    match outcome {
        Ok(Ok(true)) => 1,
        Ok(Ok(false)) => 0,
        Ok(Err(e)) => {
            log::debug!("ValidateKey: {}", e);
            0
        }
        Err(payload) => {
            log::error!("ValidateKey panicked: {}", panic_message(payload.as_ref()));
            0
        }
    }
}

/// Liberate `input_path` and decrypt it into `output_path`.
///
/// # Safety
/// All arguments are null or valid NUL-terminated strings.
#[export_name = "DecryptDatabase"]
pub unsafe extern "C" fn decrypt_database(
    input_path: *const c_char,
    output_path: *const c_char,
    hex_key: *const c_char,
) -> *mut c_char {
    guarded("DecryptDatabase", || {
        let input = arg(input_path, "input_path")?;
        let output = arg(output_path, "output_path")?;
        let key = arg(hex_key, "hex_key")?;
        let engine = engine()?;
        decrypt_best_effort(native_liberator(), engine, Path::new(input), Path::new(output), key)
    })
}

/// Force other processes to release `file_path` through the Restart Manager.
///
/// # Safety
/// `file_path` is null or a valid NUL-terminated string.
#[export_name = "ForceUnlockFile"]
pub unsafe extern "C" fn force_unlock_file(file_path: *const c_char) -> *mut c_char {
    guarded("ForceUnlockFile", || {
        let path = arg(file_path, "file_path")?;
        native_liberator()?.force_unlock_file(Path::new(path)).map(|_| ())
    })
}

/// Close this process's own handles to `file_path`.
///
/// # Safety
/// `file_path` is null or a valid NUL-terminated string.
#[export_name = "CloseSelfFileHandles"]
pub unsafe extern "C" fn close_self_file_handles(file_path: *const c_char) -> *mut c_char {
    guarded("CloseSelfFileHandles", || {
        let path = arg(file_path, "file_path")?;
        native_liberator()?.close_self_file_handles(Path::new(path)).map(|_| ())
    })
}

/// Release a string returned by any export. Null is ignored.
///
/// # Safety
/// `s` is null or a pointer returned by this library and not yet freed.
#[export_name = "FreeString"]
pub unsafe extern "C" fn free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    // SAFETY: produced by CString::into_raw in this module, freed once.
    drop(CString::from_raw(s));
}
