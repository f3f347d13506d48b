use crate::error::{ErrorKind, Result};
use crate::sweep::{Location, RemovalReason, aged_buckets, classify, hours};
use crate::{Context, Device};
use async_stream::stream;
use capstore_config::Config;
use capstore_storage::file::list_stream;
use capstore_storage::{ContentType, Hour};
use exn::ResultExt;
use futures::Stream;
use futures::stream::{BoxStream, select_all};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::fs;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum SweepEvent {
    /// Every file in an aged bucket was deleted and the bucket recreated.
    BucketPurged { device: String, content: ContentType, hour: Hour, removed: usize },
    /// A single stray or expired file was deleted.
    Removed { device: String, content: ContentType, path: PathBuf, reason: RemovalReason },
    /// The device pass is over.
    Finished(SweepSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub device: String,
    pub purged_buckets: usize,
    pub purged_files: usize,
    pub orphans: usize,
    pub expired: usize,
    pub failed: usize,
    /// The pass ran to the end without being cancelled.
    pub completed: bool,
}
impl SweepSummary {
    fn new(device: &str) -> Self {
        Self { device: device.to_string(), ..Self::default() }
    }

    fn record(&mut self, item: &Result<SweepEvent>) {
        match item {
            Ok(SweepEvent::BucketPurged { removed, .. }) => {
                self.purged_buckets += 1;
                self.purged_files += removed;
            },
            Ok(SweepEvent::Removed { reason: RemovalReason::Orphan, .. }) => self.orphans += 1,
            Ok(SweepEvent::Removed { reason: RemovalReason::Expired, .. }) => self.expired += 1,
            Ok(SweepEvent::Finished(_)) => {},
            Err(_) => self.failed += 1,
        }
    }
}

/// Run one sweep over every device in `ctx`, treating `now` as the current
/// time.
pub fn sweep<'a>(
    ctx: &'a Context,
    now: OffsetDateTime,
    cancel: &'a CancellationToken,
) -> impl Stream<Item = Result<SweepEvent>> + Send + 'a {
    select_all(ctx.devices().iter().map(move |device| sweep_device(ctx.config(), device, now, cancel)))
}

/// Sweep a single device: purge aged buckets, then clear strays from the
/// remaining buckets, loose expired files from the content directories, and
/// strays from the hot tier. The cold scratch directory is never touched.
pub fn sweep_device<'a>(
    config: &'a Config,
    device: &'a Device,
    now: OffsetDateTime,
    cancel: &'a CancellationToken,
) -> BoxStream<'a, Result<SweepEvent>> {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    Box::pin(stream!({
        let mut summary = SweepSummary::new(&device.id);
        let current = Hour::of(now, device.cold.offset());
        let orphan_idle = config.sweep.orphan_idle();

        if let Err(e) = device.cold.ensure_layout().await {
            summary.failed += 1;
            yield Err(e.raise(ErrorKind::Layout { device: device.id.clone(), dir: device.cold.root().to_path_buf() }));
        }

        'content: for content in ContentType::ALL {
            let window_hours = *config.cold_retention_hours.get(content);
            let aged = aged_buckets(current, window_hours);
            for hour in Hour::all() {
                if cancel.is_cancelled() {
                    break 'content;
                }
                let pass = if aged.contains(&hour) {
                    purge_bucket(device, content, hour, cancel)
                } else {
                    let dir = device.cold.bucket_dir(content, hour);
                    prune(device, content, dir, Location::Tier, orphan_idle, now, cancel)
                };
                for await item in pass {
                    summary.record(&item);
                    yield item;
                }
            }

            let loose = Location::LooseCold { window: hours(window_hours) };
            let passes = [
                prune(device, content, device.cold.content_dir(content), loose, orphan_idle, now, cancel),
                prune(device, content, device.hot.content_dir(content), Location::Tier, orphan_idle, now, cancel),
            ];
            for pass in passes {
                for await item in pass {
                    summary.record(&item);
                    yield item;
                }
            }
        }

        summary.completed = !cancel.is_cancelled();
        yield Ok(SweepEvent::Finished(summary));
    }))
}

/// Delete everything inside one bucket, then make sure the bucket exists.
fn purge_bucket<'a>(
    device: &'a Device,
    content: ContentType,
    hour: Hour,
    cancel: &'a CancellationToken,
) -> BoxStream<'a, Result<SweepEvent>> {
    Box::pin(stream!({
        let dir = device.cold.bucket_dir(content, hour);
        let mut removed = 0;
        match entries(&dir).await {
            Ok(entries) => {
                for (path, is_dir) in entries {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match remove(device, &path, is_dir).await {
                        Ok(true) => removed += 1,
                        Ok(false) => {},
                        Err(e) => yield Err(e),
                    }
                }
            },
            // Recreated below.
            Err(e) if e.kind() == IoErrorKind::NotFound => {},
            Err(e) => {
                yield Err(e).or_raise(|| ErrorKind::Listing { device: device.id.clone(), content, dir: dir.clone() });
                return;
            },
        }
        match device.cold.ensure_bucket(content, hour).await {
            Ok(_) => {
                if removed > 0 {
                    tracing::debug!(device = %device.id, %content, %hour, removed, "Purged hour bucket");
                }
                yield Ok(SweepEvent::BucketPurged { device: device.id.clone(), content, hour, removed });
            },
            Err(e) => yield Err(e.raise(ErrorKind::Layout { device: device.id.clone(), dir })),
        }
    }))
}

/// Delete the files directly inside `dir` that [`classify`] selects.
fn prune<'a>(
    device: &'a Device,
    content: ContentType,
    dir: PathBuf,
    location: Location,
    orphan_idle: Duration,
    now: OffsetDateTime,
    cancel: &'a CancellationToken,
) -> BoxStream<'a, Result<SweepEvent>> {
    Box::pin(stream!({
        for await file in list_stream(&dir) {
            if cancel.is_cancelled() {
                break;
            }
            let file = match file {
                Ok(file) => file,
                Err(e) => {
                    yield Err(e.raise(ErrorKind::Listing { device: device.id.clone(), content, dir: dir.clone() }));
                    continue;
                },
            };
            let Some(reason) = classify(content, &file, location, orphan_idle, now) else {
                continue;
            };
            match remove(device, &file.path, false).await {
                Ok(true) => {
                    tracing::debug!(device = %device.id, path = %file.path.display(), %reason, "Removed file");
                    yield Ok(SweepEvent::Removed { device: device.id.clone(), content, path: file.path, reason });
                },
                Ok(false) => {},
                Err(e) => yield Err(e),
            }
        }
    }))
}

async fn entries(dir: &Path) -> std::io::Result<Vec<(PathBuf, bool)>> {
    let mut read = fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = read.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        entries.push((entry.path(), is_dir));
    }
    Ok(entries)
}

/// Remove a file or directory tree. `Ok(false)` if it was already gone.
async fn remove(device: &Device, path: &Path, is_dir: bool) -> Result<bool> {
    let removed = if is_dir { fs::remove_dir_all(path).await } else { fs::remove_file(path).await };
    match removed {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).or_raise(|| ErrorKind::Remove { device: device.id.clone(), path: path.to_path_buf() }),
    }
}
