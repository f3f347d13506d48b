//! File metadata and directory listing.
//!
//! Both tiers are flat directories of immutable files, so listing is a single
//! `read_dir` per directory. The file's mtime is the canonical timestamp of a
//! capture; names are never parsed for ordering.

use crate::error::{Error, ErrorKind, Result};
use crate::path::file_name;
use async_stream::stream;
use futures::Stream;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;
use tokio::fs::{self, DirEntry};

pub type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Metadata of one regular file on either tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Absolute path of the file
    pub path: PathBuf,
    /// File name (last path component)
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp; the capture time of the content
    pub modified: OffsetDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: OffsetDateTime) -> Result<Self> {
        let path = path.into();
        let name = file_name(&path)?.to_string();
        Ok(Self { path, name, size, modified })
    }

    pub(crate) fn from_metadata(path: PathBuf, metadata: &Metadata) -> Result<Self> {
        let modified = metadata.modified().map_err(|e| ErrorKind::from_io(e, &path))?;
        let Some(modified) = timestamp(modified) else {
            exn::bail!(ErrorKind::InvalidTimestamp(path));
        };
        Self::new(path, metadata.len(), modified)
    }

    /// Time since last modification. Files with an mtime in the future (clock
    /// adjustments) are reported as zero age.
    pub fn age(&self, now: OffsetDateTime) -> Duration {
        (now - self.modified).try_into().unwrap_or(Duration::ZERO)
    }

    /// Re-read metadata for a single file.
    pub async fn stat(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).await.map_err(|e| ErrorKind::from_io(e, path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
        }
        Self::from_metadata(path.to_path_buf(), &metadata)
    }
}

/// Checked `SystemTime` conversion. tmpfs happily stores mtimes past year
/// 9999, which `OffsetDateTime::from` would panic on.
pub fn timestamp(time: SystemTime) -> Option<OffsetDateTime> {
    let nanos = match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i128::try_from(after.as_nanos()).ok()?,
        Err(before) => -i128::try_from(before.duration().as_nanos()).ok()?,
    };
    OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
}

enum DirItem {
    File(FileInfo),
    Skip,
}

async fn process_entry(entry: DirEntry) -> Result<DirItem> {
    let path = entry.path();
    let metadata = entry.metadata().await.map_err(|e| ErrorKind::from_io(e, &path))?;
    if metadata.is_file() {
        return Ok(DirItem::File(FileInfo::from_metadata(path, &metadata)?));
    }
    // Note: subdirectories, sockets and broken symlinks are not files we own.
    Ok(DirItem::Skip)
}

/// Stream the regular files directly inside `dir` (non-recursive).
///
/// A directory that does not exist is an error here: callers list directories
/// that are supposed to exist, and a missing one means the tree is broken.
/// Per-entry failures (a file vanishing between `read_dir` and `stat`) are
/// yielded as `Err` items without ending the stream.
pub fn list_stream(dir: &Path) -> FileInfoStream<'_> {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    Box::pin(stream!({
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                yield Err(exn::Exn::from(ErrorKind::from_io(e, dir)));
                return;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    yield Err(exn::Exn::from(ErrorKind::from_io(e, dir)));
                    break;
                },
            };
            match process_entry(entry).await {
                Ok(DirItem::File(f)) => yield Ok(f),
                Ok(DirItem::Skip) => {},
                // Vanished between listing and stat; the producer or another
                // pass removed it. Nothing to report.
                Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => {},
                Err(e) => yield Err(e),
            }
        }
    }))
}

/// Files of one directory listing, oldest mtime first (ties broken by name),
/// plus the entries that could not be read.
#[derive(Debug, Default)]
pub struct Listing {
    pub files: Vec<FileInfo>,
    pub skipped: Vec<Error>,
}

/// List the regular files in `dir`. An entry whose metadata is unusable is set
/// aside in [`Listing::skipped`]; only failing to open `dir` is an error.
pub async fn list_partial(dir: &Path) -> Result<Listing> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| ErrorKind::from_io(e, dir))?;
    let mut listing = Listing::default();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                listing.skipped.push(ErrorKind::from_io(e, dir).into());
                break;
            },
        };
        match process_entry(entry).await {
            Ok(DirItem::File(f)) => listing.files.push(f),
            Ok(DirItem::Skip) => {},
            Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => {},
            Err(e) => listing.skipped.push(e),
        }
    }
    sort_oldest_first(&mut listing.files);
    Ok(listing)
}

fn sort_oldest_first(files: &mut [FileInfo]) {
    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
}
