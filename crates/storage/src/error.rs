//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File or directory does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied (permissions or ownership)
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Path contains invalid characters, escapes its root, or is not absolute
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// The hot tier path is a plain directory on the backing disk, not a mount
    #[display("not a distinct mount: {}", _0.display())]
    NotMounted(#[error(not(source))] PathBuf),
    /// Mounting the RAM tier failed, or the `mount` binary is missing
    #[display("mount failed: {_0}")]
    Mount(#[error(not(source))] String),
    /// A copied file did not match its source after being flushed to disk
    #[display("verification failed: {}", _0.display())]
    Verification(#[error(not(source))] PathBuf),
    /// The file's mtime lies outside the representable date range
    #[display("unrepresentable modification time: {}", _0.display())]
    InvalidTimestamp(#[error(not(source))] PathBuf),
    /// The configured service user or group does not exist
    #[display("unknown service identity: {_0}")]
    UnknownIdentity(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Verification(_) | Self::PermissionDenied(_))
    }

    /// Map an I/O error for `path` to the most specific kind.
    pub fn from_io(err: IoError, path: impl AsRef<Path>) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.as_ref().to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.as_ref().to_path_buf()),
            _ => Self::Io(err),
        }
    }
}
