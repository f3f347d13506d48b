//! Retention Sweeper.
//!
//! Each hour bucket cycles through fresh, aged and purged once a day. A bucket
//! is aged once it lies at least `min(window, 23)` hours behind the current
//! hour; with the common 24-hour window that is exactly the bucket for the
//! next hour, which holds the oldest data of the rolling day. Purged buckets
//! are recreated straight away.
//!
//! There is no read/purge exclusion. A reader listing a bucket while it is
//! being purged may see files disappear underneath it.

mod stream;

pub use self::stream::{SweepEvent, SweepSummary, sweep, sweep_device};

use capstore_storage::layout::HOURS_PER_DAY;
use capstore_storage::{ContentType, FileInfo, Hour};
use derive_more::Display;
use std::time::Duration;
use time::OffsetDateTime;

/// Why a single file was deleted outside of a bucket purge.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Matches no naming pattern and has been idle long enough.
    #[display("orphan")]
    Orphan,
    /// A loose archivable file older than its content type's window.
    #[display("expired")]
    Expired,
}

/// Buckets to purge at `now` for a retention window of `window_hours`.
pub fn aged_buckets(now: Hour, window_hours: u8) -> Vec<Hour> {
    let threshold = window_hours.min(HOURS_PER_DAY - 1);
    Hour::all().filter(|hour| hour.hours_behind(now) >= threshold).collect()
}

pub(crate) fn hours(window_hours: u8) -> Duration {
    Duration::from_secs(u64::from(window_hours) * 3600)
}

/// Where a file was found, which decides the rules applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Location {
    /// A hot content directory or a cold hour bucket.
    Tier,
    /// Directly under a cold content directory, outside any bucket.
    LooseCold { window: Duration },
}

/// Decide whether `file` should be removed by the orphan or expiry passes.
pub(crate) fn classify(
    content: ContentType,
    file: &FileInfo,
    location: Location,
    orphan_idle: Duration,
    now: OffsetDateTime,
) -> Option<RemovalReason> {
    if content.is_pinned(&file.name) {
        return None;
    }
    let age = file.age(now);
    if content.matches(&file.name) {
        return match location {
            Location::LooseCold { window } if age >= window => Some(RemovalReason::Expired),
            _ => None,
        };
    }
    (age >= orphan_idle).then_some(RemovalReason::Orphan)
}
