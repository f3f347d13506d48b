//! Last successful archive pass per device, persisted next to the cold tier
//! so a separate `health` process can read it.

use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs;

/// Record `at` as the time of the last completed archive pass.
pub(crate) async fn write(path: &Path, at: OffsetDateTime) -> std::io::Result<()> {
    let stamp = at.format(&Rfc3339).map_err(std::io::Error::other)?;
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    fs::write(&temp, stamp.as_bytes()).await?;
    fs::rename(&temp, path).await
}

/// Read the last recorded pass; `None` if the device was never archived or
/// the file is unreadable.
pub(crate) async fn read(path: &Path) -> Option<OffsetDateTime> {
    match fs::read_to_string(path).await {
        Ok(raw) => match OffsetDateTime::parse(raw.trim(), &Rfc3339) {
            Ok(at) => Some(at),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed archive heartbeat");
                None
            },
        },
        Err(e) if e.kind() == IoErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot read archive heartbeat");
            None
        },
    }
}
