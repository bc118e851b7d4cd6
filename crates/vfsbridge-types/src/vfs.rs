//! The synchronous virtual-filesystem contract.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::code::ErrorKind;

/// Largest offset, length, or size a single call may carry (`i32::MAX`).
pub const MAX_IO: u64 = i32::MAX as u64;

/// Caller-chosen identifier for an open file. Never reused after close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Flags accepted by [`Vfs::open`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Create the file and any missing parent directories.
    pub create: bool,
    /// Refuse writes and truncation. Ignored when `create` is set.
    pub read_only: bool,
    /// Remove the file when it is closed.
    pub delete_on_close: bool,
}

impl OpenFlags {
    pub fn create() -> Self {
        Self {
            create: true,
            ..Self::default()
        }
    }

    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn read_write() -> Self {
        Self::default()
    }

    pub fn delete_on_close(mut self, yes: bool) -> Self {
        self.delete_on_close = yes;
        self
    }

    /// Read-only as the backing side will treat it.
    pub fn effective_read_only(&self) -> bool {
        !self.create && self.read_only
    }
}

/// Out-parameters of a successful open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opened {
    pub file: FileId,
    pub read_only: bool,
}

/// Outcome of a successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Every requested byte came from the file.
    Complete,
    /// The file ended early; the rest of the buffer is zeroes.
    Short,
}

/// Failures surfaced by the synchronous contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VfsError {
    #[error("I/O error")]
    Io,
    #[error("not found")]
    NotFound,
    #[error("misuse of the VFS API")]
    Misuse,
    #[error("write failed")]
    WriteFailure,
    #[error("truncate failed")]
    TruncateFailure,
}

impl VfsError {
    /// The error for a failure kind. Short reads are not errors.
    pub fn from_kind(kind: ErrorKind) -> Option<Self> {
        match kind {
            ErrorKind::Io => Some(VfsError::Io),
            ErrorKind::NotFound => Some(VfsError::NotFound),
            ErrorKind::Misuse => Some(VfsError::Misuse),
            ErrorKind::ShortRead => None,
            ErrorKind::WriteFailure => Some(VfsError::WriteFailure),
            ErrorKind::TruncateFailure => Some(VfsError::TruncateFailure),
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

/// Check that an offset or size fits the 32-bit signed range.
pub fn checked_offset(value: u64) -> VfsResult<u32> {
    if value > MAX_IO {
        return Err(VfsError::Misuse);
    }
    u32::try_from(value).map_err(|_| VfsError::Misuse)
}

/// Check that a transfer length fits the 32-bit signed range.
pub fn checked_len(value: usize) -> VfsResult<u32> {
    checked_offset(value as u64)
}

/// Blocking method table a synchronous caller (a database engine, say)
/// drives. Every call returns only once the backing store has answered.
pub trait Vfs {
    fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Opened>;

    /// Close `file`. Closing an unknown or already-closed id is `NotFound`.
    fn close(&self, file: FileId) -> VfsResult<()>;

    /// Fill `buf` from `offset`.
    fn read(&self, file: FileId, buf: &mut [u8], offset: u64) -> VfsResult<ReadStatus>;

    fn write(&self, file: FileId, data: &[u8], offset: u64) -> VfsResult<()>;

    fn sync(&self, file: FileId) -> VfsResult<()>;

    fn truncate(&self, file: FileId, size: u64) -> VfsResult<()>;

    fn file_size(&self, file: FileId) -> VfsResult<u64>;

    /// Remove `path`; with `clean_ancestors`, also remove parents left empty.
    fn delete(&self, path: &str, clean_ancestors: bool) -> VfsResult<()>;

    /// Whether `path` names an existing file. Never mutates anything.
    fn access(&self, path: &str) -> VfsResult<bool>;

    /// Block for `duration`, for backoff between retries.
    fn sleep(&self, duration: Duration) -> VfsResult<()>;
}
