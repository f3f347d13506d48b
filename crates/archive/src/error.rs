//! Archive Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Every kind carries enough context to
//! diagnose a failure from the log line alone; the storage error that caused
//! it hangs below it in the error tree.

use capstore_storage::ContentType;
use derive_more::{Display, Error};
use std::path::PathBuf;
use time::OffsetDateTime;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures are scoped to the smallest unit that failed (file, content type,
/// device) and never abort a whole cycle; everything here is retried on the
/// next pass.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A hot or cold directory could not be listed.
    #[display("device {device}: cannot list {content} in {}", dir.display())]
    Listing { device: String, content: ContentType, dir: PathBuf },
    /// A single file could not be moved to the cold tier; it stays in RAM.
    #[display("device {device}: failed to archive {} ({content}, mtime {modified}, {size} bytes)", path.display())]
    Relocate { device: String, content: ContentType, path: PathBuf, modified: OffsetDateTime, size: u64 },
    /// A single file could not be deleted by the sweeper.
    #[display("device {device}: failed to remove {}", path.display())]
    Remove { device: String, path: PathBuf },
    /// A cold tier directory could not be created.
    #[display("device {device}: cannot create cold tier directory {}", dir.display())]
    Layout { device: String, dir: PathBuf },
    /// The archive heartbeat could not be written.
    #[display("device {device}: failed to record archive heartbeat")]
    Heartbeat {
        #[error(not(source))]
        device: String,
    },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Listing { .. } | Self::Relocate { .. } | Self::Remove { .. } | Self::Heartbeat { .. } => true,
            Self::Layout { .. } => false,
        }
    }

    pub fn device(&self) -> &str {
        match self {
            Self::Listing { device, .. }
            | Self::Relocate { device, .. }
            | Self::Remove { device, .. }
            | Self::Layout { device, .. }
            | Self::Heartbeat { device } => device,
        }
    }
}
