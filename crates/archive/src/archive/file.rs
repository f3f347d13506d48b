use crate::Device;
use crate::error::{ErrorKind, Result};
use capstore_storage::{ContentType, FileInfo, Relocation, relocate};
use exn::ResultExt;
use std::path::PathBuf;
use time::OffsetDateTime;

/// A file that now lives in the cold tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archived {
    pub device: String,
    pub content: ContentType,
    /// Where the file was in the hot tier
    pub from: PathBuf,
    pub relocation: Relocation,
    pub modified: OffsetDateTime,
    pub size: u64,
}

/// Pick the archival candidates from `files` (sorted oldest first): all but
/// the newest `retention`.
pub fn select_candidates(mut files: Vec<FileInfo>, retention: usize) -> Vec<FileInfo> {
    let excess = files.len().saturating_sub(retention);
    files.truncate(excess);
    files
}

/// Relocate one hot file into its cold bucket.
///
/// On failure the file is left in the hot tier for the next cycle.
pub async fn archive_file(device: &Device, content: ContentType, file: &FileInfo) -> Result<Archived> {
    let bucket = device.cold.resolve_bucket(content, file.modified);
    let relocation = relocate(file, &bucket).await.or_raise(|| ErrorKind::Relocate {
        device: device.id.clone(),
        content,
        path: file.path.clone(),
        modified: file.modified,
        size: file.size,
    })?;
    Ok(Archived {
        device: device.id.clone(),
        content,
        from: file.path.clone(),
        relocation,
        modified: file.modified,
        size: file.size,
    })
}
