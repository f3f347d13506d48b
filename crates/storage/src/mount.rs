//! RAM tier provisioning and validation.
//!
//! The hot tier only makes sense as a memory-backed mount. A plain directory
//! left behind after a reboot or an unmount looks identical to every producer
//! and reader, so [`validate`] checks that the path really is the root of a
//! separate filesystem before anything is allowed to use it.

use crate::content::ContentType;
use crate::error::{ErrorKind, Result};
use crate::hot::HotTier;
use nix::sys::statvfs::statvfs;
use nix::unistd::{Gid, Group, Uid, User, chown};
use std::fs::Permissions;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Command;
use tokio::fs;
use tracing::instrument;

/// Owner of the RAM mount, shared by the producer and the mover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}
impl Ownership {
    /// Resolve a user name (and optional group name) to numeric ids. Without a
    /// group, the user's primary group is used.
    pub fn resolve(user: &str, group: Option<&str>) -> Result<Self> {
        let user = User::from_name(user)
            .map_err(|e| ErrorKind::Io(e.into()))?
            .ok_or_else(|| exn::Exn::from(ErrorKind::UnknownIdentity(user.to_string())))?;
        let gid = match group {
            Some(name) => {
                Group::from_name(name)
                    .map_err(|e| ErrorKind::Io(e.into()))?
                    .ok_or_else(|| exn::Exn::from(ErrorKind::UnknownIdentity(name.to_string())))?
                    .gid
            },
            None => user.gid,
        };
        Ok(Self { uid: user.uid.as_raw(), gid: gid.as_raw() })
    }

    /// The identity this process runs as.
    pub fn current() -> Self {
        Self { uid: Uid::effective().as_raw(), gid: Gid::effective().as_raw() }
    }
}

/// Everything needed to mount one device's hot tier.
#[derive(Debug, Clone)]
pub struct MountSpec {
    pub path: PathBuf,
    pub size_mb: u64,
    pub owner: Ownership,
    /// Permission bits of the mount root, e.g. `0o2775`
    pub mode: u32,
}
impl MountSpec {
    /// The `-o` argument passed to `mount -t tmpfs`.
    pub fn options(&self) -> String {
        format!(
            "size={}M,mode={:o},uid={},gid={},noexec,nodev,nosuid",
            self.size_mb, self.mode, self.owner.uid, self.owner.gid
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// The path was already a mount; only the subdirectories were checked.
    AlreadyMounted,
    /// A new tmpfs was mounted.
    Mounted,
}

/// Fill level of a mounted filesystem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Usage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}
impl Usage {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    pub fn fill_percent(&self) -> f64 {
        match self.total_bytes {
            0 => 0.0,
            total => self.used_bytes() as f64 * 100.0 / total as f64,
        }
    }
}

/// Whether `path` is the root of a different filesystem than its parent.
pub async fn is_distinct_mount(path: &Path) -> Result<bool> {
    let own = fs::metadata(path).await.map_err(|e| ErrorKind::from_io(e, path))?;
    if !own.is_dir() {
        return Ok(false);
    }
    let Some(parent) = path.parent() else {
        // "/" is always its own mount.
        return Ok(true);
    };
    let parent_meta = fs::metadata(parent).await.map_err(|e| ErrorKind::from_io(e, parent))?;
    Ok(own.dev() != parent_meta.dev())
}

/// Fail unless `path` is a distinct mount.
pub async fn validate(path: &Path) -> Result<()> {
    match is_distinct_mount(path).await {
        Ok(true) => Ok(()),
        Ok(false) => exn::bail!(ErrorKind::NotMounted(path.to_path_buf())),
        Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => exn::bail!(ErrorKind::NotMounted(path.to_path_buf())),
        Err(e) => Err(e),
    }
}

/// Mount the RAM tier described by `spec` and create its content
/// subdirectories. Idempotent: an existing mount is left alone.
///
/// Requires root (or `CAP_SYS_ADMIN`) when a mount is actually performed.
#[instrument(skip_all, fields(path = %spec.path.display(), size_mb = spec.size_mb))]
pub async fn provision(spec: &MountSpec) -> Result<Provisioned> {
    fs::create_dir_all(&spec.path).await.map_err(|e| ErrorKind::from_io(e, &spec.path))?;
    let outcome = if is_distinct_mount(&spec.path).await? {
        tracing::info!("RAM tier already mounted; skipping");
        Provisioned::AlreadyMounted
    } else {
        mount_tmpfs(spec).await?;
        // A mount that "succeeded" but left a plain directory is still fatal.
        validate(&spec.path).await?;
        tracing::info!(options = %spec.options(), "Mounted RAM tier");
        Provisioned::Mounted
    };

    prepare_content_dirs(spec).await?;
    Ok(outcome)
}

/// Create the content subdirectories and give them the owner and mode of the
/// mount root. `create_dir_all` honours the umask, which would leave them
/// unwritable for a producer that only shares the group.
pub(crate) async fn prepare_content_dirs(spec: &MountSpec) -> Result<()> {
    let hot = HotTier::new(&spec.path);
    hot.ensure_dirs().await?;
    for content in ContentType::ALL {
        let dir = hot.content_dir(content);
        chown(&dir, Some(Uid::from_raw(spec.owner.uid)), Some(Gid::from_raw(spec.owner.gid)))
            .map_err(|e| ErrorKind::from_io(e.into(), &dir))?;
        fs::set_permissions(&dir, Permissions::from_mode(spec.mode))
            .await
            .map_err(|e| ErrorKind::from_io(e, &dir))?;
    }
    Ok(())
}

async fn mount_tmpfs(spec: &MountSpec) -> Result<()> {
    let mount = which::which("mount").map_err(|e| ErrorKind::Mount(format!("mount binary not found: {e}")))?;
    let options = spec.options();
    let path = spec.path.clone();
    let output = tokio::task::spawn_blocking(move || {
        Command::new(mount).args(["-t", "tmpfs", "-o", &options, "tmpfs"]).arg(&path).output()
    })
    .await
    .map_err(|e| ErrorKind::Io(std::io::Error::other(e)))?
    .map_err(ErrorKind::Io)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        exn::bail!(ErrorKind::Mount(format!("{}: {}", output.status, stderr.trim())));
    }
    Ok(())
}

/// Capacity and free space of the filesystem holding `path`.
pub fn usage(path: &Path) -> Result<Usage> {
    let stat = statvfs(path).map_err(|e| ErrorKind::from_io(e.into(), path))?;
    let fragment = stat.fragment_size() as u64;
    Ok(Usage {
        total_bytes: stat.blocks() as u64 * fragment,
        available_bytes: stat.blocks_available() as u64 * fragment,
    })
}
