//! Hot (RAM) tier directory layout and listing.

use crate::content::ContentType;
use crate::error::Result;
use crate::file::{Listing, list_partial};
use crate::layout::create_dir;
use std::path::{Path, PathBuf};

/// The hot tier of one device: a memory-backed mount with one flat
/// subdirectory per content type, written directly by the producer.
#[derive(Debug, Clone)]
pub struct HotTier {
    root: PathBuf,
}
impl HotTier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn content_dir(&self, content: ContentType) -> PathBuf {
        self.root.join(content.dir_name())
    }

    /// Create any missing content subdirectory, returning how many were created.
    pub async fn ensure_dirs(&self) -> Result<usize> {
        let mut created = 0;
        for content in ContentType::ALL {
            if create_dir(&self.content_dir(content)).await? {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Archivable files of `content`, oldest mtime first.
    ///
    /// Pinned files and strays are excluded; they are never archival
    /// candidates. Entries whose metadata is unusable are returned in
    /// [`Listing::skipped`] so one bad file cannot block the rest.
    pub async fn list(&self, content: ContentType) -> Result<Listing> {
        let mut listing = list_partial(&self.content_dir(content)).await?;
        listing.files.retain(|f| content.matches(&f.name));
        Ok(listing)
    }
}
