//! Crash-safe relocation of a single file between tiers.
//!
//! The source is only ever removed once an identical copy is durable at the
//! destination. A crash at any point leaves the source in place, at worst
//! alongside a `.<name>.partial` stray in the destination bucket.

use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::layout::create_dir;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::instrument;

pub const TEMP_SUFFIX: &str = ".partial";
const COPY_BUFFER: usize = 64 * 1024;

/// How a file reached its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relocation {
    /// Atomic rename; source and destination share a filesystem.
    Renamed(PathBuf),
    /// Copied, verified, renamed into place and source removed.
    Copied(PathBuf),
}
impl Relocation {
    pub fn destination(&self) -> &Path {
        match self {
            Self::Renamed(p) | Self::Copied(p) => p,
        }
    }
}

/// Name of the in-flight copy of `name` inside its destination directory.
pub fn temp_path(dest_dir: &Path, name: &str) -> PathBuf {
    dest_dir.join(format!(".{name}{TEMP_SUFFIX}"))
}

/// Move `source` into `dest_dir`, keeping its name and mtime.
///
/// Creates `dest_dir` if it is missing and discards any stale partial copy
/// left behind by an interrupted run. If the destination already holds a file
/// of the same name (interrupted after rename, before the source was
/// removed), it is replaced by the source.
///
/// On error the source is never removed.
#[instrument(skip_all, fields(file = %source.path.display(), dest = %dest_dir.display()))]
pub async fn relocate(source: &FileInfo, dest_dir: &Path) -> Result<Relocation> {
    create_dir(dest_dir).await?;
    remove_stale_temp(dest_dir, &source.name).await?;
    if same_filesystem(&source.path, dest_dir).await? {
        let target = dest_dir.join(&source.name);
        fs::rename(&source.path, &target).await.map_err(|e| ErrorKind::from_io(e, &source.path))?;
        return Ok(Relocation::Renamed(target));
    }
    copy_then_remove(source, dest_dir).await
}

/// The cross-filesystem path of [`relocate`], also used directly in tests.
pub(crate) async fn copy_then_remove(source: &FileInfo, dest_dir: &Path) -> Result<Relocation> {
    let src = source.path.clone();
    let temp = temp_path(dest_dir, &source.name);
    let target = dest_dir.join(&source.name);
    let dir = dest_dir.to_path_buf();
    let copied = {
        let target = target.clone();
        tokio::task::spawn_blocking(move || copy_durable(&src, &temp, &target, &dir))
            .await
            .map_err(|e| ErrorKind::Io(std::io::Error::other(e)))?
    };
    copied?;
    match fs::remove_file(&source.path).await {
        Ok(()) => {},
        // Already gone; the copy is durable so nothing was lost.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => exn::bail!(ErrorKind::from_io(e, &source.path)),
    }
    Ok(Relocation::Copied(target))
}

async fn same_filesystem(file: &Path, dir: &Path) -> Result<bool> {
    let file_meta = fs::metadata(file).await.map_err(|e| ErrorKind::from_io(e, file))?;
    let dir_meta = fs::metadata(dir).await.map_err(|e| ErrorKind::from_io(e, dir))?;
    Ok(file_meta.dev() == dir_meta.dev())
}

async fn remove_stale_temp(dest_dir: &Path, name: &str) -> Result<()> {
    let temp = temp_path(dest_dir, name);
    match fs::remove_file(&temp).await {
        Ok(()) => {
            tracing::info!(path = %temp.display(), "Discarded partial copy from an interrupted relocation");
            Ok(())
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => exn::bail!(ErrorKind::from_io(e, &temp)),
    }
}

/// Copy to `temp`, carry over the mtime, fsync, verify, rename to `target`
/// and fsync the directory entry. The temp file is removed on failure.
fn copy_durable(source: &Path, temp: &Path, target: &Path, dir: &Path) -> Result<()> {
    let result = copy_verified(source, temp).and_then(|()| {
        std::fs::rename(temp, target).map_err(|e| ErrorKind::from_io(e, target))?;
        File::open(dir).and_then(|d| d.sync_all()).map_err(|e| ErrorKind::from_io(e, dir))?;
        Ok(())
    });
    if result.is_err() {
        _ = std::fs::remove_file(temp);
    }
    result
}

fn copy_verified(source: &Path, temp: &Path) -> Result<()> {
    let mut reader = File::open(source).map_err(|e| ErrorKind::from_io(e, source))?;
    let metadata = reader.metadata().map_err(|e| ErrorKind::from_io(e, source))?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(temp)
        .map_err(|e| ErrorKind::from_io(e, temp))?;

    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; COPY_BUFFER];
    let mut copied: u64 = 0;
    loop {
        let n = reader.read(&mut buffer).map_err(|e| ErrorKind::from_io(e, source))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        writer.write_all(&buffer[..n]).map_err(|e| ErrorKind::from_io(e, temp))?;
        copied += n as u64;
    }
    let modified = metadata.modified().map_err(|e| ErrorKind::from_io(e, source))?;
    writer.set_modified(modified).map_err(|e| ErrorKind::from_io(e, temp))?;
    writer.sync_all().map_err(|e| ErrorKind::from_io(e, temp))?;
    drop(writer);

    if copied != metadata.len() {
        exn::bail!(ErrorKind::Verification(temp.to_path_buf()));
    }
    let mut check = blake3::Hasher::new();
    let written = File::open(temp).map_err(|e| ErrorKind::from_io(e, temp))?;
    check.update_reader(written).map_err(|e| ErrorKind::from_io(e, temp))?;
    if check.finalize() != hasher.finalize() {
        exn::bail!(ErrorKind::Verification(temp.to_path_buf()));
    }
    Ok(())
}
