//! Mount driver abstraction and mount-point reconciliation.
//!
//! [`Mounter`] is the seam between the staging state machine and the host's
//! mount table. [`SystemMounter`] drives the real system utilities; tests
//! substitute an in-memory implementation.

mod system;

#[cfg(test)]
pub(crate) mod fake;

pub use system::SystemMounter;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::libc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// One entry of the host mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub device: String,
    pub path: PathBuf,
    pub fs_type: String,
    pub opts: Vec<String>,
}

/// Mount driver capability.
pub trait Mounter: Send + Sync {
    /// Snapshot of the current mount table.
    fn list(&self) -> io::Result<Vec<MountPoint>>;

    /// Cheap mount check that may miss bind mounts. `Ok(true)` means the
    /// path is probably not a mount point. Errors from probing the path are
    /// returned unchanged so callers can tell missing from corrupted paths.
    fn is_likely_not_mount_point(&self, path: &Path) -> io::Result<bool>;

    fn mount(&self, source: &str, target: &Path, fs_type: &str, options: &[String])
    -> Result<()>;

    fn unmount(&self, target: &Path) -> Result<()>;

    /// Create a filesystem on `source` unless one already exists, then mount
    /// it at `target`.
    fn format_and_mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<()>;

    /// Like [`Mounter::is_likely_not_mount_point`] but also consults the full
    /// mount table, which catches bind mounts.
    fn is_not_mount_point(&self, path: &Path) -> io::Result<bool> {
        if !self.is_likely_not_mount_point(path)? {
            return Ok(false);
        }
        let absolute = std::path::absolute(path)?;
        Ok(!self.list()?.iter().any(|mp| mp.path == absolute))
    }

    /// Unmount `target` if it is mounted and remove the directory.
    ///
    /// A path that no longer exists counts as cleaned up. Corrupted mounts are
    /// unmounted without further probing.
    fn cleanup_mount_point(&self, target: &Path, extensive_check: bool) -> Result<()> {
        let probe = if extensive_check {
            self.is_not_mount_point(target)
        } else {
            self.is_likely_not_mount_point(target)
        };

        let not_mounted = match probe {
            Ok(not_mounted) => not_mounted,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(target = %target.display(), "mount point does not exist, nothing to clean up");
                return Ok(());
            }
            Err(e) if is_corrupted_mount(&e) => {
                warn!(target = %target.display(), error = %e, "detected corrupted mount");
                false
            }
            Err(e) => return Err(e.into()),
        };

        if !not_mounted {
            self.unmount(target)?;
        }

        match fs::remove_dir(target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Whether an error from probing a path means the mount behind it is stale
/// or disconnected rather than the path being missing or unreadable.
pub fn is_corrupted_mount(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::ENOTCONN | libc::ESTALE | libc::EIO | libc::EACCES | libc::EHOSTDOWN)
    )
}

fn is_corrupted_dir(path: &Path) -> bool {
    fs::metadata(path).is_err_and(|e| is_corrupted_mount(&e))
}

/// Make `target` usable as a mount point.
///
/// Returns `Ok(true)` when a healthy mount already exists at `target` and
/// `Ok(false)` after creating the directory for a fresh mount. A mount whose
/// directory cannot be listed is unmounted and reported as
/// [`Error::CorruptedMount`] so the caller retries against a clean path.
pub fn ensure_mount_point(mounter: &dyn Mounter, target: &Path) -> Result<bool> {
    let mut mounted = match mounter.is_likely_not_mount_point(target) {
        Ok(not_mounted) => !not_mounted,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) if is_corrupted_mount(&e) || is_corrupted_dir(target) => {
            warn!(target = %target.display(), error = %e, "detected corrupted mount");
            true
        }
        Err(e) => return Err(e.into()),
    };

    // The point query misses bind mounts.
    let absolute = std::path::absolute(target)?;
    if mounter.list()?.iter().any(|mp| mp.path == absolute) {
        mounted = true;
    }

    if mounted {
        return match fs::read_dir(target) {
            Ok(_) => {
                debug!(target = %target.display(), "already mounted");
                Ok(true)
            }
            Err(source) => {
                warn!(target = %target.display(), error = %source, "mount is not traversable, unmounting");
                mounter.unmount(target)?;
                Err(Error::CorruptedMount {
                    target: target.display().to_string(),
                    source,
                })
            }
        };
    }

    fs::create_dir_all(target)?;
    Ok(false)
}

/// Parse `/proc/mounts` formatted text.
pub fn parse_mount_table(contents: &str) -> Vec<MountPoint> {
    contents
        .lines()
        .filter_map(|line| {
            // <device> <mountpoint> <fstype> <options> <dump> <pass>
            let mut fields = line.split_whitespace();
            let device = unescape(fields.next()?);
            let path = PathBuf::from(unescape(fields.next()?));
            let fs_type = fields.next().unwrap_or_default().to_string();
            let opts = fields
                .next()
                .map(|o| o.split(',').map(str::to_string).collect())
                .unwrap_or_default();
            Some(MountPoint {
                device,
                path,
                fs_type,
                opts,
            })
        })
        .collect()
}

/// Decode the octal escapes (`\040` for space, ...) the kernel uses in the
/// mount table.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..=i + 3].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(b) = u8::try_from(value) {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
