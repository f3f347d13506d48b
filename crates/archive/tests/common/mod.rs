#![allow(dead_code)]

use capstore_archive::{Context, Device};
use capstore_config::{Config, DeviceConfig};
use futures::{Stream, StreamExt};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tempfile::TempDir;
use time::OffsetDateTime;

fn device_config(id: &str, base_path: PathBuf) -> DeviceConfig {
    DeviceConfig { id: id.to_string(), base_path, hot_path: None, cold_path: None, ram_size_mb: None }
}

/// A single device whose hot tier is `<tmp>/hot` and cold tier is `<tmp>`.
/// With [`Fixture::devices`], each device gets `<tmp>/<id>` instead.
pub struct Fixture {
    pub ctx: Context,
    _dir: TempDir,
}
impl Fixture {
    pub fn new(configure: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config { devices: vec![device_config("capture1", dir.path().to_path_buf())], ..Config::default() };
        configure(&mut config);
        Self { ctx: Context::new(Arc::new(config)), _dir: dir }
    }

    pub fn devices(ids: &[&str], configure: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let devices = ids.iter().map(|id| device_config(id, dir.path().join(id))).collect();
        let mut config = Config { devices, ..Config::default() };
        configure(&mut config);
        Self { ctx: Context::new(Arc::new(config)), _dir: dir }
    }

    pub fn device(&self) -> &Device {
        &self.ctx.devices()[0]
    }

    pub fn named(&self, id: &str) -> &Device {
        self.ctx.device(id).unwrap()
    }
}

/// Create `dir/name` with some content and the given mtime.
pub fn write(dir: &Path, name: &str, modified: OffsetDateTime) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, name.as_bytes()).unwrap();
    File::options().write(true).open(&path).unwrap().set_modified(SystemTime::from(modified)).unwrap();
    path
}

pub fn mtime(path: &Path) -> OffsetDateTime {
    std::fs::metadata(path).unwrap().modified().unwrap().into()
}

/// File names directly inside `dir`, sorted.
pub fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub async fn collect<S: Stream>(stream: S) -> Vec<S::Item> {
    stream.collect().await
}
