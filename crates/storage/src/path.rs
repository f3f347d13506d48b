//! Path validation utilities.
//!
//! Device base paths come from configuration and file names come from
//! directory listings written by an external producer; both are checked here
//! before anything is created, moved or deleted.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates and normalizes an absolute directory path.
///
/// > **Note:** `..` components are resolved lexically and may never climb
/// >           above the filesystem root. Null bytes are explicitly rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use capstore_storage::validate_absolute;
/// assert_eq!(
///     validate_absolute("/var/www//stream/./capture1/").unwrap(),
///     Path::new("/var/www/stream/capture1")
/// );
/// assert!(validate_absolute("relative/capture1").is_err());
/// assert!(validate_absolute("/../etc").is_err());
/// assert!(validate_absolute("/").is_err());
/// ```
pub fn validate_absolute(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if !path.is_absolute() {
        exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
    }
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
            },
        }
    }
    // Refuse to manage the filesystem root itself.
    if components.is_empty() {
        exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
    }
    let mut normalized = PathBuf::from("/");
    normalized.extend(components);
    Ok(normalized)
}

/// Returns the final component of `path` as UTF-8.
///
/// Every recognised capture file name is ASCII, so anything that isn't valid
/// UTF-8 is reported as an invalid path rather than lossily converted.
pub fn file_name(path: &Path) -> Result<&str> {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if !name.contains('\0') => Ok(name),
        _ => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
    }
}
