//! Status codes written into control-block slots.
//!
//! `0` is success. Failures are negative and looked up through an
//! [`ErrorCodes`] table that the Caller pushes to the Executor during the
//! handshake, so neither side hard-codes the numbers independently.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Slot value meaning success.
pub const SUCCESS: i32 = 0;

/// Slot value meaning "request in flight, no result yet".
pub const SENTINEL: i32 = i32::MIN;

/// Closed set of failure classes a slot can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Generic backing-store failure.
    Io,
    /// Path or file handle missing.
    NotFound,
    /// API contract violated upstream.
    Misuse,
    /// Fewer bytes available than requested; the buffer tail is zero-filled.
    ShortRead,
    /// Write rejected or partially applied.
    WriteFailure,
    /// Truncate rejected or failed.
    TruncateFailure,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::Io,
        ErrorKind::NotFound,
        ErrorKind::Misuse,
        ErrorKind::ShortRead,
        ErrorKind::WriteFailure,
        ErrorKind::TruncateFailure,
    ];
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "io",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Misuse => "misuse",
            ErrorKind::ShortRead => "short-read",
            ErrorKind::WriteFailure => "write-failure",
            ErrorKind::TruncateFailure => "truncate-failure",
        };
        f.write_str(name)
    }
}

/// Numeric value for each [`ErrorKind`].
///
/// Defaults follow SQLite's result codes, negated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErrorCodes {
    pub io: i32,
    pub not_found: i32,
    pub misuse: i32,
    pub short_read: i32,
    pub write_failure: i32,
    pub truncate_failure: i32,
}

impl Default for ErrorCodes {
    fn default() -> Self {
        Self {
            io: -10,
            not_found: -12,
            misuse: -21,
            short_read: -522,
            write_failure: -778,
            truncate_failure: -1546,
        }
    }
}

/// Why an [`ErrorCodes`] table was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeTableError {
    #[error("code for {kind} must be negative, got {code}")]
    NotNegative { kind: ErrorKind, code: i32 },
    #[error("code for {kind} collides with the in-flight sentinel")]
    Sentinel { kind: ErrorKind },
    #[error("{first} and {second} share code {code}")]
    Duplicate {
        first: ErrorKind,
        second: ErrorKind,
        code: i32,
    },
}

impl ErrorCodes {
    /// Code to write for `kind`.
    pub fn code(&self, kind: ErrorKind) -> i32 {
        match kind {
            ErrorKind::Io => self.io,
            ErrorKind::NotFound => self.not_found,
            ErrorKind::Misuse => self.misuse,
            ErrorKind::ShortRead => self.short_read,
            ErrorKind::WriteFailure => self.write_failure,
            ErrorKind::TruncateFailure => self.truncate_failure,
        }
    }

    /// Kind for a slot value. `None` for success, the sentinel, and codes
    /// outside the table.
    pub fn kind(&self, code: i32) -> Option<ErrorKind> {
        ErrorKind::ALL.into_iter().find(|k| self.code(*k) == code)
    }

    /// Every code must be negative, distinct, and not the sentinel.
    pub fn validate(&self) -> Result<(), CodeTableError> {
        for (i, kind) in ErrorKind::ALL.iter().enumerate() {
            let code = self.code(*kind);
            if code == SENTINEL {
                return Err(CodeTableError::Sentinel { kind: *kind });
            }
            if code >= 0 {
                return Err(CodeTableError::NotNegative { kind: *kind, code });
            }
            if let Some(first) = ErrorKind::ALL[..i].iter().find(|k| self.code(**k) == code) {
                return Err(CodeTableError::Duplicate {
                    first: *first,
                    second: *kind,
                    code,
                });
            }
        }
        Ok(())
    }
}
