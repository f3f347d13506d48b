//! Cold tier directory layout.
//!
//! ```text
//! <cold_root>/
//! ├── .archive-heartbeat
//! ├── tmp/                      scratch space for external consumers
//! ├── captures/{0..23}/
//! ├── thumbnails/{0..23}/
//! ├── segments/{0..23}/
//! ├── metadata/{0..23}/
//! └── audio/{0..23}/
//! ```
//!
//! [`ColdLayout::resolve_bucket`] is the only place a timestamp is turned into
//! a bucket. The mover uses it to decide where to write and readers use it to
//! decide where to look.

use crate::content::ContentType;
use crate::error::{ErrorKind, Result};
use derive_more::Display;
use std::path::{Path, PathBuf};
use time::{OffsetDateTime, UtcOffset};
use tokio::fs;
use tracing::instrument;

pub const HOURS_PER_DAY: u8 = 24;
/// Scratch directory used for multi-segment merging by consumers.
pub const SCRATCH_DIR: &str = "tmp";
pub const HEARTBEAT_FILE: &str = ".archive-heartbeat";

/// An hour-of-day bucket, `0..=23`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hour(u8);
impl Hour {
    pub fn new(hour: u8) -> Option<Self> {
        (hour < HOURS_PER_DAY).then_some(Self(hour))
    }

    /// The hour-of-day of `timestamp` in the system-wide `offset`.
    pub fn of(timestamp: OffsetDateTime, offset: UtcOffset) -> Self {
        Self(timestamp.to_offset(offset).hour())
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// The bucket after this one, wrapping at midnight.
    pub fn next(self) -> Self {
        Self((self.0 + 1) % HOURS_PER_DAY)
    }

    /// How many hours `self` lies behind `now` on the 24-hour clock, `0..=23`.
    ///
    /// The bucket for the next hour is 23 hours behind: it holds the oldest
    /// data of the rolling window.
    pub fn hours_behind(self, now: Hour) -> u8 {
        (now.0 + HOURS_PER_DAY - self.0) % HOURS_PER_DAY
    }

    pub fn all() -> impl Iterator<Item = Hour> {
        (0..HOURS_PER_DAY).map(Hour)
    }
}

/// Outcome of [`ColdLayout::ensure_layout`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LayoutReport {
    /// Directories that were missing and have been created
    pub created: usize,
}

/// The cold tier of one device.
#[derive(Debug, Clone)]
pub struct ColdLayout {
    root: PathBuf,
    offset: UtcOffset,
}
impl ColdLayout {
    pub fn new(root: impl Into<PathBuf>, offset: UtcOffset) -> Self {
        Self { root: root.into(), offset }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    pub fn content_dir(&self, content: ContentType) -> PathBuf {
        self.root.join(content.dir_name())
    }

    pub fn bucket_dir(&self, content: ContentType, hour: Hour) -> PathBuf {
        self.content_dir(content).join(hour.to_string())
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    pub fn heartbeat_path(&self) -> PathBuf {
        self.root.join(HEARTBEAT_FILE)
    }

    /// Map a timestamp to the bucket directory holding content captured at
    /// that time.
    pub fn resolve_bucket(&self, content: ContentType, timestamp: OffsetDateTime) -> PathBuf {
        self.bucket_dir(content, Hour::of(timestamp, self.offset))
    }

    /// Create every hour bucket for every content type plus the scratch
    /// directory. Idempotent.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub async fn ensure_layout(&self) -> Result<LayoutReport> {
        let mut report = LayoutReport::default();
        for content in ContentType::ALL {
            for hour in Hour::all() {
                if create_dir(&self.bucket_dir(content, hour)).await? {
                    report.created += 1;
                }
            }
        }
        if create_dir(&self.scratch_dir()).await? {
            report.created += 1;
        }
        if report.created > 0 {
            tracing::info!(created = report.created, "Created missing cold tier directories");
        }
        Ok(report)
    }

    /// Create a single bucket if it is missing, returning its path.
    pub async fn ensure_bucket(&self, content: ContentType, hour: Hour) -> Result<PathBuf> {
        let dir = self.bucket_dir(content, hour);
        create_dir(&dir).await?;
        Ok(dir)
    }

    /// Buckets that should exist but don't.
    pub async fn missing_buckets(&self) -> Result<Vec<(ContentType, Hour)>> {
        let mut missing = Vec::new();
        for content in ContentType::ALL {
            for hour in Hour::all() {
                let dir = self.bucket_dir(content, hour);
                if !fs::try_exists(&dir).await.map_err(|e| ErrorKind::from_io(e, &dir))? {
                    missing.push((content, hour));
                }
            }
        }
        Ok(missing)
    }
}

/// `create_dir_all` that reports whether anything was created.
pub(crate) async fn create_dir(dir: &Path) -> Result<bool> {
    match fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => return Ok(false),
        Ok(_) => exn::bail!(ErrorKind::InvalidPath(dir.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => exn::bail!(ErrorKind::from_io(e, dir)),
    }
    fs::create_dir_all(dir).await.map_err(|e| ErrorKind::from_io(e, dir))?;
    Ok(true)
}
