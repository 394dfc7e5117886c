//! In-memory mount driver for tests.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{MountPoint, Mounter};
use crate::error::{Error, Result};

#[derive(Debug)]
struct FakeMount {
    point: MountPoint,
    /// Hidden from the cheap point check, like a bind mount.
    table_only: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    mounts: Vec<FakeMount>,
    formatted: HashSet<String>,
    format_count: usize,
    probe_errors: HashMap<PathBuf, i32>,
    fail_mount: HashSet<PathBuf>,
    fail_unmount: HashSet<PathBuf>,
}

/// Records mount calls instead of touching the host.
///
/// Mount targets must still exist on disk for the point check to succeed,
/// so tests exercise the directory handling of the real code paths.
#[derive(Debug, Default)]
pub struct FakeMounter {
    state: Mutex<FakeState>,
}

impl FakeMounter {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_mount(&self, device: &str, path: &Path) {
        self.push(device, path, "ext4", &[], false);
    }

    pub fn add_table_only_mount(&self, device: &str, path: &Path) {
        self.push(device, path, "none", &["bind".to_string()], true);
    }

    fn push(&self, device: &str, path: &Path, fs_type: &str, opts: &[String], table_only: bool) {
        self.state().mounts.push(FakeMount {
            point: MountPoint {
                device: device.to_string(),
                path: path.to_path_buf(),
                fs_type: fs_type.to_string(),
                opts: opts.to_vec(),
            },
            table_only,
        });
    }

    pub fn mounts(&self) -> Vec<MountPoint> {
        self.state().mounts.iter().map(|m| m.point.clone()).collect()
    }

    pub fn format_count(&self) -> usize {
        self.state().format_count
    }

    /// Make the point check on `path` fail with `errno`.
    pub fn fail_probe(&self, path: &Path, errno: i32) {
        self.state().probe_errors.insert(path.to_path_buf(), errno);
    }

    pub fn fail_mount(&self, path: &Path) {
        self.state().fail_mount.insert(path.to_path_buf());
    }

    pub fn fail_unmount(&self, path: &Path) {
        self.state().fail_unmount.insert(path.to_path_buf());
    }
}

impl Mounter for FakeMounter {
    fn list(&self) -> io::Result<Vec<MountPoint>> {
        Ok(self.mounts())
    }

    fn is_likely_not_mount_point(&self, path: &Path) -> io::Result<bool> {
        if let Some(errno) = self.state().probe_errors.get(path) {
            return Err(io::Error::from_raw_os_error(*errno));
        }
        fs::metadata(path)?;
        Ok(!self
            .state()
            .mounts
            .iter()
            .any(|m| !m.table_only && m.point.path == path))
    }

    fn mount(&self, source: &str, target: &Path, fs_type: &str, options: &[String]) -> Result<()> {
        if self.state().fail_mount.contains(target) {
            return Err(Error::Mount {
                mount_source: source.to_string(),
                target: target.display().to_string(),
                source: io::Error::other("injected mount failure"),
            });
        }
        self.push(source, target, fs_type, options, false);
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let mut state = self.state();
        let failure = |source| Error::Unmount {
            target: target.display().to_string(),
            source,
        };
        if state.fail_unmount.contains(target) {
            return Err(failure(io::Error::other("injected unmount failure")));
        }
        let Some(idx) = state.mounts.iter().rposition(|m| m.point.path == target) else {
            return Err(failure(io::Error::from_raw_os_error(nix::libc::EINVAL)));
        };
        state.mounts.remove(idx);
        Ok(())
    }

    fn format_and_mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<()> {
        {
            let mut state = self.state();
            if state.fail_mount.contains(target) {
                return Err(Error::Format {
                    device: source.to_string(),
                    fs_type: fs_type.to_string(),
                    message: "injected format failure".to_string(),
                });
            }
            if state.formatted.insert(source.to_string()) {
                state.format_count += 1;
            }
        }
        self.mount(source, target, fs_type, options)
    }
}
