//! Archival mover: drains each hot tier into the hour buckets of its cold
//! tier.
//!
//! Per device and content type, every file beyond the newest
//! `hot_retention` files is relocated, oldest mtime first, into the bucket
//! [`resolve_bucket`](capstore_storage::ColdLayout::resolve_bucket) picks for
//! its mtime. Content types are counted independently.
//!
//! The primary entry point is [`archive`], which merges one event stream per
//! device so a slow disk on one device never holds back the others.

mod file;
mod stream;

pub use self::file::{Archived, archive_file, select_candidates};
pub use self::stream::{ArchiveEvent, DeviceSummary, archive, archive_device};
