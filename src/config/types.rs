/// Core types shared by every liberation component
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// NTSTATUS value returned by the kernel information query
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NtStatus(pub u32);

impl NtStatus {
    pub const SUCCESS: NtStatus = NtStatus(0x0000_0000);
    pub const INFO_LENGTH_MISMATCH: NtStatus = NtStatus(0xC000_0004);
    pub const BUFFER_TOO_SMALL: NtStatus = NtStatus(0xC000_0023);
    pub const ACCESS_DENIED: NtStatus = NtStatus(0xC000_0022);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// The kernel wants a bigger output buffer
    pub fn is_buffer_too_small(self) -> bool {
        self == Self::INFO_LENGTH_MISMATCH || self == Self::BUFFER_TOO_SMALL
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Raw handle value as it appears in a handle table record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleValue(pub usize);

impl fmt::Display for HandleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// Errors produced by the liberation subsystem
#[derive(Error, Debug)]
pub enum LiberationError {
    #[error("failed to resolve absolute path for {path}: {source}")]
    PathResolution {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("NtQuerySystemInformation failed while scanning for {path} with status: {status}")]
    KernelQueryFailed { path: String, status: NtStatus },

    #[error("NtQuerySystemInformation still reported a short buffer after {attempts} attempts")]
    SnapshotRetriesExhausted { attempts: u32 },

    #[error("handle snapshot needs {requested} bytes, above the {limit} byte limit")]
    SnapshotTooLarge { requested: usize, limit: usize },

    #[error("handle snapshot declares {declared} entries but only {capacity} fit in the buffer")]
    MalformedSnapshot { declared: usize, capacity: usize },

    #[error("no handles found for file: {path}")]
    NoHandlesFound { path: String },

    #[error("RmStartSession failed for {path} with error code: {code}")]
    SessionStartFailed { path: String, code: u32 },

    #[error("RmRegisterResources failed for {path} with error code: {code}")]
    ResourceRegistrationFailed { path: String, code: u32 },

    #[error("RmShutdown failed for {path} with error code: {code}")]
    ForceShutdownFailed { path: String, code: u32 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported platform: {0}")]
    Unsupported(String),

    #[error("Decryption engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LiberationError {
    /// Native error code carried by the variant, if any
    pub fn native_code(&self) -> Option<u32> {
        match self {
            LiberationError::KernelQueryFailed { status, .. } => Some(status.0),
            LiberationError::SessionStartFailed { code, .. }
            | LiberationError::ResourceRegistrationFailed { code, .. }
            | LiberationError::ForceShutdownFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type alias for liberation operations
pub type Result<T> = std::result::Result<T, LiberationError>;
