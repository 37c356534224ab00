//! The error taxonomy every kernel primitive reports through.
//!
//! Grounded on `slopos_mm::error::MmError`: a plain enum with a
//! hand-written `Display`, no external error crate. Primitives return
//! `Result<T, ErrorCode>`; the per-process error slot stores the most
//! recent `ErrorCode` for `get_last_error`.

use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    InvalidSvc,
    InvalidParams,
    NotSupported,
    /// Attempted I/O on a closed channel.
    NotActive,
    NotFound,
    AccessDenied,
    AlreadyConfigured,
    OutOfRange,
    OutOfSystemMemory,
    OutOfPagedMemory,
    IoCancelled,
    InProgress,
    Timeout,
    SyncObjectDestroyed,
    /// Completion deferred; the caller will be notified via IPC.
    Sync,
    StubCalled,
    InvalidState,
    IpcOverflow,
}

impl ErrorCode {
    pub const fn is_ok(self) -> bool {
        matches!(self, ErrorCode::Ok)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Ok => "ok",
            ErrorCode::InvalidSvc => "invalid supervisor call number",
            ErrorCode::InvalidParams => "invalid parameters",
            ErrorCode::NotSupported => "not supported",
            ErrorCode::NotActive => "object not active",
            ErrorCode::NotFound => "not found",
            ErrorCode::AccessDenied => "access denied",
            ErrorCode::AlreadyConfigured => "already configured",
            ErrorCode::OutOfRange => "out of range",
            ErrorCode::OutOfSystemMemory => "out of system pool memory",
            ErrorCode::OutOfPagedMemory => "out of paged pool memory",
            ErrorCode::IoCancelled => "i/o cancelled",
            ErrorCode::InProgress => "operation already in progress",
            ErrorCode::Timeout => "timed out",
            ErrorCode::SyncObjectDestroyed => "synchronization object destroyed",
            ErrorCode::Sync => "completes asynchronously",
            ErrorCode::StubCalled => "stub called",
            ErrorCode::InvalidState => "invalid state for this operation",
            ErrorCode::IpcOverflow => "ipc queue overflow",
        };
        f.write_str(s)
    }
}

pub type KResult<T = ()> = Result<T, ErrorCode>;
