//! Configuration model.
//!
//! Defaults mirror a typical single-board capture host: a 200 MiB RAM tier
//! per device, archival every few seconds and a sweep every minute.

use crate::error::{ErrorKind, Result};
use crate::serde_ext::{octal, offset};
use capstore_storage::{ContentType, validate_absolute};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use time::UtcOffset;

static DEVICE_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// One value per content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerContentType<T> {
    pub captures: T,
    pub thumbnails: T,
    pub segments: T,
    pub metadata: T,
    pub audio: T,
}
impl<T> PerContentType<T> {
    pub fn get(&self, content: ContentType) -> &T {
        match content {
            ContentType::Captures => &self.captures,
            ContentType::Thumbnails => &self.thumbnails,
            ContentType::Segments => &self.segments,
            ContentType::Metadata => &self.metadata,
            ContentType::Audio => &self.audio,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ContentType, &T)> {
        ContentType::ALL.into_iter().map(move |c| (c, self.get(c)))
    }
}

/// The single service identity shared by producer, mover and sweeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Owner of the RAM mount. Defaults to the user running `provision`.
    pub user: Option<String>,
    /// Group of the RAM mount. Defaults to the user's primary group.
    pub group: Option<String>,
    /// Permission bits of the RAM mount root.
    #[serde(with = "octal")]
    pub mode: u32,
}
impl Default for ServiceConfig {
    fn default() -> Self {
        Self { user: None, group: None, mode: 0o2775 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Seconds between archival cycles.
    pub interval_secs: u64,
    /// Files modified more recently than this are never moved.
    pub min_age_ms: u64,
    /// Soft time budget per device and cycle; the rest is deferred.
    pub device_deadline_ms: u64,
}
impl Default for ArchiveConfig {
    fn default() -> Self {
        Self { interval_secs: 5, min_age_ms: 500, device_deadline_ms: 3_000 }
    }
}
impl ArchiveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn min_age(&self) -> Duration {
        Duration::from_millis(self.min_age_ms)
    }

    pub fn device_deadline(&self) -> Duration {
        Duration::from_millis(self.device_deadline_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Seconds between retention sweeps.
    pub interval_secs: u64,
    /// Unrecognised files idle for longer than this are deleted.
    pub orphan_idle_secs: u64,
}
impl Default for SweepConfig {
    fn default() -> Self {
        Self { interval_secs: 60, orphan_idle_secs: 300 }
    }
}
impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn orphan_idle(&self) -> Duration {
        Duration::from_secs(self.orphan_idle_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds between health reports in the service.
    pub interval_secs: u64,
    /// Archive is stale after this many missed archive intervals.
    pub stale_after_cycles: u32,
    pub warn_fill_percent: f64,
    pub critical_fill_percent: f64,
    /// Hot files above the retention count tolerated before reporting.
    pub backlog_tolerance: usize,
}
impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            stale_after_cycles: 3,
            warn_fill_percent: 75.0,
            critical_fill_percent: 90.0,
            backlog_tolerance: 50,
        }
    }
}
impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// One capture source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub base_path: PathBuf,
    /// RAM tier mount point; `<base_path>/hot` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hot_path: Option<PathBuf>,
    /// Cold tier root; `<base_path>` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cold_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_size_mb: Option<u64>,
}
impl DeviceConfig {
    pub fn hot_path(&self) -> PathBuf {
        self.hot_path.clone().unwrap_or_else(|| self.base_path.join("hot"))
    }

    pub fn cold_path(&self) -> PathBuf {
        self.cold_path.clone().unwrap_or_else(|| self.base_path.clone())
    }

    fn validate(&self) -> Result<()> {
        if !DEVICE_ID_REGEX.is_match(&self.id) {
            exn::bail!(ErrorKind::Invalid(format!("device id `{}` must match [A-Za-z0-9_-]+", self.id)));
        }
        let hot = absolute(&self.id, "hot_path", &self.hot_path())?;
        let cold = absolute(&self.id, "cold_path", &self.cold_path())?;
        if hot == cold || cold.starts_with(&hot) {
            exn::bail!(ErrorKind::Invalid(format!("device `{}`: cold tier must not live on the hot tier", self.id)));
        }
        if ContentType::ALL.iter().any(|c| hot.starts_with(cold.join(c.dir_name()))) {
            exn::bail!(ErrorKind::Invalid(format!(
                "device `{}`: hot tier must not live inside a cold content directory",
                self.id
            )));
        }
        if self.ram_size_mb == Some(0) {
            exn::bail!(ErrorKind::Invalid(format!("device `{}`: ram_size_mb must be non-zero", self.id)));
        }
        Ok(())
    }
}

fn absolute(device: &str, field: &str, path: &Path) -> Result<PathBuf> {
    match validate_absolute(path) {
        Ok(p) => Ok(p),
        Err(_) => exn::bail!(ErrorKind::Invalid(format!(
            "device `{device}`: {field} `{}` must be an absolute path",
            path.display()
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// The one timezone used to turn timestamps into hour buckets.
    #[serde(with = "offset")]
    pub utc_offset: UtcOffset,
    /// Default RAM tier size per device, in MiB.
    pub ram_size_mb: u64,
    pub service: ServiceConfig,
    pub archive: ArchiveConfig,
    pub sweep: SweepConfig,
    pub health: HealthConfig,
    /// Newest files of each content type kept in the hot tier.
    pub hot_retention: PerContentType<usize>,
    /// Hours each content type survives in the cold tier, `1..=24`.
    pub cold_retention_hours: PerContentType<u8>,
    pub devices: Vec<DeviceConfig>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            utc_offset: UtcOffset::UTC,
            ram_size_mb: 200,
            service: ServiceConfig::default(),
            archive: ArchiveConfig::default(),
            sweep: SweepConfig::default(),
            health: HealthConfig::default(),
            hot_retention: PerContentType { captures: 100, thumbnails: 100, segments: 10, metadata: 100, audio: 10 },
            cold_retention_hours: PerContentType { captures: 1, thumbnails: 24, segments: 24, metadata: 24, audio: 24 },
            devices: Vec::new(),
        }
    }
}
impl Config {
    pub fn ram_size_mb(&self, device: &DeviceConfig) -> u64 {
        device.ram_size_mb.unwrap_or(self.ram_size_mb)
    }

    /// Check cross-field consistency. Called by every loader.
    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            exn::bail!(ErrorKind::Invalid("no devices configured".to_string()));
        }
        let mut ids = HashSet::new();
        let mut hot_paths = HashSet::new();
        for device in &self.devices {
            device.validate()?;
            if !ids.insert(device.id.as_str()) {
                exn::bail!(ErrorKind::Invalid(format!("duplicate device id `{}`", device.id)));
            }
            if !hot_paths.insert(device.hot_path()) {
                exn::bail!(ErrorKind::Invalid(format!("device `{}` shares its hot path", device.id)));
            }
        }
        for (content, hours) in self.cold_retention_hours.iter() {
            if !(1..=24).contains(hours) {
                exn::bail!(ErrorKind::Invalid(format!("cold_retention_hours.{content} must be within 1..=24")));
            }
        }
        if self.ram_size_mb == 0 {
            exn::bail!(ErrorKind::Invalid("ram_size_mb must be non-zero".to_string()));
        }
        for (name, value) in [
            ("archive.interval_secs", self.archive.interval_secs),
            ("sweep.interval_secs", self.sweep.interval_secs),
            ("health.interval_secs", self.health.interval_secs),
            ("health.stale_after_cycles", u64::from(self.health.stale_after_cycles)),
        ] {
            if value == 0 {
                exn::bail!(ErrorKind::Invalid(format!("{name} must be non-zero")));
            }
        }
        let (warn, critical) = (self.health.warn_fill_percent, self.health.critical_fill_percent);
        if !(0.0..=100.0).contains(&warn) || !(0.0..=100.0).contains(&critical) || warn > critical {
            exn::bail!(ErrorKind::Invalid(
                "fill thresholds must satisfy 0 <= warn_fill_percent <= critical_fill_percent <= 100".to_string()
            ));
        }
        Ok(())
    }
}
