//! Read-only diagnostics for each device.
//!
//! Nothing here creates, moves or deletes a file. Observation failures are
//! reported as problems inside the record instead of as errors, so a broken
//! device still produces a (degraded) record.

use crate::{Context, Device, heartbeat};
use capstore_config::Config;
use capstore_storage::{ContentType, mount};
use derive_more::Display;
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use time::OffsetDateTime;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[display("ok")]
    Ok,
    #[display("degraded")]
    Degraded,
    #[display("critical")]
    Critical,
}

/// Hot tier file count of one content type against its retention count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Backlog {
    pub content: ContentType,
    pub count: usize,
    pub retention: usize,
    /// How far `count` exceeds `retention`
    pub overshoot: usize,
}

/// One health record, serialized as a single JSON object per device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceHealth {
    pub device: String,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub hot_path: PathBuf,
    pub cold_path: PathBuf,
    /// The hot path is the root of its own filesystem
    pub hot_mounted: bool,
    pub hot_fill_percent: Option<f64>,
    /// End of the last completed archive pass
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_archive: Option<OffsetDateTime>,
    pub archive_age_secs: Option<u64>,
    pub archive_stale: bool,
    pub backlog: Vec<Backlog>,
    pub missing_buckets: usize,
    pub status: Status,
    pub problems: Vec<String>,
}
impl DeviceHealth {
    fn flag(&mut self, status: Status, problem: String) {
        self.status = self.status.max(status);
        self.problems.push(problem);
    }
}

/// Observe one device at `now`.
pub async fn inspect(config: &Config, device: &Device, now: OffsetDateTime) -> DeviceHealth {
    let mut health = DeviceHealth {
        device: device.id.clone(),
        checked_at: now,
        hot_path: device.hot.root().to_path_buf(),
        cold_path: device.cold.root().to_path_buf(),
        hot_mounted: false,
        hot_fill_percent: None,
        last_archive: None,
        archive_age_secs: None,
        archive_stale: true,
        backlog: Vec::with_capacity(ContentType::ALL.len()),
        missing_buckets: 0,
        status: Status::Ok,
        problems: Vec::new(),
    };

    match mount::is_distinct_mount(device.hot.root()).await {
        Ok(true) => health.hot_mounted = true,
        Ok(false) => health.flag(Status::Critical, "hot tier is not a distinct mount".to_string()),
        Err(e) => health.flag(Status::Critical, format!("hot tier unavailable: {e}")),
    }

    if health.hot_mounted {
        let root = device.hot.root().to_path_buf();
        match tokio::task::spawn_blocking(move || mount::usage(&root)).await {
            Ok(Ok(usage)) => {
                let percent = usage.fill_percent();
                health.hot_fill_percent = Some(percent);
                if percent >= config.health.critical_fill_percent {
                    health.flag(Status::Critical, format!("hot tier {percent:.1}% full"));
                } else if percent >= config.health.warn_fill_percent {
                    health.flag(Status::Degraded, format!("hot tier {percent:.1}% full"));
                }
            },
            Ok(Err(e)) => health.flag(Status::Degraded, format!("cannot measure hot tier usage: {e}")),
            Err(e) => health.flag(Status::Degraded, format!("hot tier usage check failed: {e}")),
        }
    }

    let stale_after = config.archive.interval_secs.saturating_mul(u64::from(config.health.stale_after_cycles));
    health.last_archive = heartbeat::read(&device.cold.heartbeat_path()).await;
    match health.last_archive {
        Some(at) => {
            let age = (now - at).whole_seconds().max(0).unsigned_abs();
            health.archive_age_secs = Some(age);
            health.archive_stale = age > stale_after;
            if health.archive_stale {
                health.flag(Status::Critical, format!("last archive pass {age}s ago (limit {stale_after}s)"));
            }
        },
        None => health.flag(Status::Critical, "no archive pass recorded".to_string()),
    }

    for content in ContentType::ALL {
        let retention = *config.hot_retention.get(content);
        match device.hot.list(content).await {
            Ok(listing) => {
                if !listing.skipped.is_empty() {
                    health.flag(Status::Degraded, format!("{} unreadable hot {content} files", listing.skipped.len()));
                }
                let count = listing.files.len();
                let overshoot = count.saturating_sub(retention);
                if overshoot > config.health.backlog_tolerance {
                    health.flag(Status::Degraded, format!("{content} backlog {count}/{retention}"));
                }
                health.backlog.push(Backlog { content, count, retention, overshoot });
            },
            Err(e) => health.flag(Status::Degraded, format!("cannot list hot {content}: {e}")),
        }
    }

    match device.cold.missing_buckets().await {
        Ok(missing) => {
            health.missing_buckets = missing.len();
            if !missing.is_empty() {
                health.flag(Status::Degraded, format!("{} cold buckets missing", missing.len()));
            }
        },
        Err(e) => health.flag(Status::Degraded, format!("cannot check cold buckets: {e}")),
    }

    health
}

/// Observe every device in `ctx` concurrently.
pub async fn inspect_all(ctx: &Context, now: OffsetDateTime) -> Vec<DeviceHealth> {
    join_all(ctx.devices().iter().map(|device| inspect(ctx.config(), device, now))).await
}
