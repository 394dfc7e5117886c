//! Mount driver backed by the host's mount utilities.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::{debug, info};

use super::{MountPoint, Mounter, parse_mount_table};
use crate::error::{Error, Result};

/// Upper bound on `-o` arguments passed to a single mount invocation.
pub const MOUNT_OPTIONS_MAX: usize = 32;

/// Filesystem created when the caller does not ask for one.
pub const DEFAULT_FS_TYPE: &str = "ext4";

/// `blkid` exit status when the device carries no recognised signature.
const BLKID_NO_MATCH: i32 = 2;

/// Shells out to `mount`, `umount`, `blkid` and `mkfs`.
///
/// Every call blocks; run them off the async executor.
#[derive(Debug, Clone)]
pub struct SystemMounter {
    mount_table: PathBuf,
}

impl Default for SystemMounter {
    fn default() -> Self {
        Self::new("/proc/mounts")
    }
}

impl SystemMounter {
    pub fn new(mount_table: impl Into<PathBuf>) -> Self {
        Self {
            mount_table: mount_table.into(),
        }
    }

    /// Existing filesystem type on `device`, or `None` if it is blank.
    fn probe_fs_type(&self, device: &str) -> Result<Option<String>> {
        let output = Command::new("blkid")
            .args(["-p", "-s", "TYPE", "-o", "value", device])
            .output()?;
        if output.status.success() {
            let fs_type = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Ok((!fs_type.is_empty()).then_some(fs_type));
        }
        if output.status.code() == Some(BLKID_NO_MATCH) {
            return Ok(None);
        }
        Err(Error::Format {
            device: device.to_string(),
            fs_type: String::new(),
            message: format!("blkid failed: {}", stderr(&output)),
        })
    }

    fn make_fs(&self, device: &str, fs_type: &str) -> Result<()> {
        let output = match fs_type {
            "ext4" => Command::new("mkfs.ext4").args(["-F", device]).output()?,
            "xfs" => Command::new("mkfs.xfs").args(["-f", device]).output()?,
            _ => Command::new("mkfs").args(["-t", fs_type, device]).output()?,
        };
        if !output.status.success() {
            return Err(Error::Format {
                device: device.to_string(),
                fs_type: fs_type.to_string(),
                message: stderr(&output),
            });
        }
        info!(device, fs_type, "created filesystem");
        Ok(())
    }
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

impl Mounter for SystemMounter {
    fn list(&self) -> io::Result<Vec<MountPoint>> {
        let contents = fs::read_to_string(&self.mount_table)?;
        Ok(parse_mount_table(&contents))
    }

    fn is_likely_not_mount_point(&self, path: &Path) -> io::Result<bool> {
        let stat = fs::metadata(path)?;
        let parent = path.parent().unwrap_or(path);
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        let parent_stat = fs::metadata(parent)?;
        // A mount point lives on a different device than its parent.
        Ok(stat.dev() == parent_stat.dev())
    }

    fn mount(&self, source: &str, target: &Path, fs_type: &str, options: &[String]) -> Result<()> {
        debug_assert!(!source.is_empty(), "source must not be empty");

        if options.len() > MOUNT_OPTIONS_MAX {
            return Err(Error::TooManyMountOptions {
                count: options.len(),
                max: MOUNT_OPTIONS_MAX,
            });
        }

        let mut cmd = Command::new("mount");
        if !fs_type.is_empty() {
            cmd.args(["-t", fs_type]);
        }
        for opt in options {
            cmd.args(["-o", opt]);
        }
        cmd.arg(source).arg(target);
        debug!(?cmd, "mount");

        let failed = |err| Error::Mount {
            mount_source: source.to_string(),
            target: target.display().to_string(),
            source: err,
        };
        let output = cmd.output().map_err(failed)?;
        if !output.status.success() {
            return Err(failed(io::Error::other(stderr(&output))));
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let failed = |source| Error::Unmount {
            target: target.display().to_string(),
            source,
        };
        let output = Command::new("umount").arg(target).output().map_err(failed)?;
        if !output.status.success() {
            return Err(failed(io::Error::other(stderr(&output))));
        }
        Ok(())
    }

    fn format_and_mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<()> {
        let fs_type = if fs_type.is_empty() {
            DEFAULT_FS_TYPE
        } else {
            fs_type
        };

        match self.probe_fs_type(source)? {
            Some(existing) => {
                debug!(device = source, fs_type = %existing, "device already formatted");
            }
            None => self.make_fs(source, fs_type)?,
        }
        self.mount(source, target, fs_type, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn list_reads_configured_mount_table() {
        let dir = TempDir::new().unwrap();
        let table = dir.path().join("mounts");
        fs::write(&table, "/dev/zram2 /var/lib/staging ext4 rw 0 0\n").unwrap();

        let mounts = SystemMounter::new(&table).list().unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].device, "/dev/zram2");
    }

    #[test]
    fn plain_directory_is_not_a_mount_point() {
        let dir = TempDir::new().unwrap();
        let child = dir.path().join("child");
        fs::create_dir(&child).unwrap();

        assert!(SystemMounter::default().is_likely_not_mount_point(&child).unwrap());
    }

    #[test]
    fn missing_path_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let err = SystemMounter::default()
            .is_likely_not_mount_point(&dir.path().join("missing"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn too_many_mount_options_rejected_before_exec() {
        let options = vec!["ro".to_string(); MOUNT_OPTIONS_MAX + 1];
        let err = SystemMounter::default()
            .mount("/dev/zram0", Path::new("/nonexistent"), "ext4", &options)
            .unwrap_err();
        assert!(matches!(err, Error::TooManyMountOptions { .. }));
    }
}
