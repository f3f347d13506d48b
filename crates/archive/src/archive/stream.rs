use crate::archive::file::{Archived, archive_file, select_candidates};
use crate::error::{ErrorKind, Result};
use crate::{Context, Device, heartbeat};
use async_stream::stream;
use capstore_config::Config;
use capstore_storage::ContentType;
use exn::ResultExt;
use futures::Stream;
use futures::stream::{BoxStream, select_all};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Progress events emitted by [`archive_device`].
///
/// Per device, [`Finished`](Self::Finished) is always the last event unless
/// the stream is dropped. Per-file failures are surfaced as `Err` items in
/// between without ending the stream.
#[derive(Debug)]
pub enum ArchiveEvent {
    /// A file has been relocated to the cold tier.
    Archived(Archived),
    /// The oldest remaining candidate is still inside the write-safety
    /// margin; it and every newer candidate wait for the next cycle.
    TooFresh { device: String, content: ContentType, path: PathBuf, age: Duration, remaining: usize },
    /// The device ran out of its time budget for this cycle.
    Deferred { device: String, content: ContentType, remaining: usize },
    /// The device pass is over.
    Finished(DeviceSummary),
}

/// Tally of one device pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSummary {
    pub device: String,
    pub archived: usize,
    pub failed: usize,
    pub deferred: usize,
    pub too_fresh: usize,
    /// Every content type was listed, the pass was not cancelled, and the
    /// heartbeat was recorded.
    pub completed: bool,
}
impl DeviceSummary {
    fn new(device: &str) -> Self {
        Self { device: device.to_string(), ..Self::default() }
    }
}

/// Run one archival cycle over every device in `ctx`.
///
/// Devices are processed concurrently and their events interleave. The
/// stream ends once every device has emitted [`ArchiveEvent::Finished`].
pub fn archive<'a>(
    ctx: &'a Context,
    cancel: &'a CancellationToken,
) -> impl Stream<Item = Result<ArchiveEvent>> + Send + 'a {
    select_all(ctx.devices().iter().map(|device| archive_device(ctx.config(), device, cancel)))
}

/// Run one archival pass for a single device.
///
/// Candidates are relocated strictly oldest first, one at a time. Each
/// content type relocates at least one candidate per pass; after that, once
/// `archive.device_deadline_ms` has elapsed, its remaining candidates are
/// deferred. Cancellation is checked between files, never during one.
pub fn archive_device<'a>(
    config: &'a Config,
    device: &'a Device,
    cancel: &'a CancellationToken,
) -> BoxStream<'a, Result<ArchiveEvent>> {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    Box::pin(stream!({
        let started = Instant::now();
        let deadline = config.archive.device_deadline();
        let min_age = config.archive.min_age();
        let mut summary = DeviceSummary::new(&device.id);
        let mut listed_all = true;

        'content: for content in ContentType::ALL {
            if cancel.is_cancelled() {
                break 'content;
            }
            let retention = *config.hot_retention.get(content);
            let listing = match device.hot.list(content).await {
                Ok(listing) => listing,
                Err(e) => {
                    listed_all = false;
                    yield Err(e.raise(ErrorKind::Listing {
                        device: device.id.clone(),
                        content,
                        dir: device.hot.content_dir(content),
                    }));
                    continue 'content;
                },
            };
            // Unreadable entries are reported and skipped; the rest still move.
            for e in listing.skipped {
                summary.failed += 1;
                yield Err(e.raise(ErrorKind::Listing {
                    device: device.id.clone(),
                    content,
                    dir: device.hot.content_dir(content),
                }));
            }
            let candidates = select_candidates(listing.files, retention);
            let total = candidates.len();
            let mut attempted = 0;

            for (index, file) in candidates.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    break 'content;
                }
                let remaining = total - index;
                if attempted > 0 && started.elapsed() >= deadline {
                    summary.deferred += remaining;
                    yield Ok(ArchiveEvent::Deferred { device: device.id.clone(), content, remaining });
                    continue 'content;
                }
                let age = file.age(OffsetDateTime::now_utc());
                if age < min_age {
                    // Sorted oldest first: everything after this is newer still.
                    summary.too_fresh += remaining;
                    yield Ok(ArchiveEvent::TooFresh {
                        device: device.id.clone(),
                        content,
                        path: file.path.clone(),
                        age,
                        remaining,
                    });
                    continue 'content;
                }
                attempted += 1;
                match archive_file(device, content, &file).await {
                    Ok(archived) => {
                        summary.archived += 1;
                        yield Ok(ArchiveEvent::Archived(archived));
                    },
                    Err(e) => {
                        summary.failed += 1;
                        yield Err(e);
                    },
                }
            }
        }

        if listed_all && !cancel.is_cancelled() {
            match heartbeat::write(&device.cold.heartbeat_path(), OffsetDateTime::now_utc())
                .await
                .or_raise(|| ErrorKind::Heartbeat { device: device.id.clone() })
            {
                Ok(()) => summary.completed = true,
                Err(e) => yield Err(e),
            }
        }
        yield Ok(ArchiveEvent::Finished(summary));
    }))
}
