//! Error types for the append log.
//!
//! Mirrors the error kinds from the design: a record that can never fit a
//! single file is a hard error, a pending close is a hard error, and an
//! existing file in local (single-process) mode is a hard error. "Does not
//! fit in the space remaining in this file" is deliberately *not* a variant
//! here — callers see that as `Ok(None)`, a normal signaling value.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`AppendLogError`].
pub type Result<T> = std::result::Result<T, AppendLogError>;

/// Errors that can occur while creating, writing to, or closing an append
/// log.
#[derive(Error, Debug)]
pub enum AppendLogError {
    /// A single record is larger than the usable capacity of one file, so
    /// no amount of rolling could ever place it. Raised synchronously by the
    /// rolling facade; never retried.
    #[error(
        "record of {record_len} bytes exceeds the {usable_capacity} byte capacity of a single file"
    )]
    CapacityExceeded {
        /// Length of the record that was rejected.
        record_len: usize,
        /// Usable bytes per file (`capacity - header_size`).
        usable_capacity: u64,
    },

    /// `close()` was called while writes were still pending (`W != N`).
    #[error("cannot close {path:?}: {pending} bytes of writes are still pending")]
    PendingOnClose {
        /// Path of the file that could not be closed.
        path: PathBuf,
        /// `N - W` at the time of the failed close.
        pending: u64,
    },

    /// The local (single-process) variant refuses to create over an
    /// existing file; only the shared variant supports reopening.
    #[error("file already exists: {0:?}")]
    FileExists(PathBuf),

    /// Underlying I/O failure (create, mmap, truncate, ...), propagated
    /// unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The shared header's magic number didn't match on open; the file was
    /// not created by this library or is corrupt.
    #[error("bad shared header in {path:?}: expected magic {expected:#018x}, found {found:#018x}")]
    BadMagic {
        /// Path of the file that failed validation.
        path: PathBuf,
        /// The magic value this crate writes.
        expected: u64,
        /// The magic value actually found in the header.
        found: u64,
    },
}
