//! Driver state management.
//!
//! `DriverState` owns the staging state machine: it serializes operations
//! per volume, provisions zram devices and drives the mount driver. It keeps
//! no record of volumes between calls; every operation re-derives what it
//! needs from the volume id and the live mount table.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use nix::sys::statvfs::statvfs;
use tracing::{debug, info};
use zram::ZramControl;

use crate::device::{DeviceHandle, DeviceTuning};
use crate::error::{Error, Result};
use crate::mount::{Mounter, SystemMounter, ensure_mount_point};
use crate::volume::get_ci;

use super::{CAPACITY_FIELD, Config, VolumeLocks, log_cleanup_error};

/// Filesystem usage of a published or staged volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeStats {
    pub available_bytes: i64,
    pub total_bytes: i64,
    pub used_bytes: i64,
    pub total_inodes: i64,
    pub free_inodes: i64,
    pub used_inodes: i64,
}

/// Shared driver state.
pub struct DriverState {
    pub config: Config,
    mounter: Arc<dyn Mounter>,
    locks: Arc<VolumeLocks>,
    control: ZramControl,
}

impl DriverState {
    pub fn new(config: Config) -> Self {
        Self::with_parts(
            config,
            Arc::new(SystemMounter::default()),
            Arc::new(VolumeLocks::new()),
        )
    }

    /// Build state around an explicit mount driver and lock table.
    pub fn with_parts(config: Config, mounter: Arc<dyn Mounter>, locks: Arc<VolumeLocks>) -> Self {
        let control = ZramControl::new(&config.sysfs_root, &config.dev_root);
        Self {
            config,
            mounter,
            locks,
            control,
        }
    }

    /// Provision a zram device for `volume_id` and mount it at
    /// `staging_path`.
    ///
    /// A healthy existing mount short-circuits. Any failure after the device
    /// is allocated releases it again.
    pub fn stage_volume(
        &self,
        volume_id: &str,
        staging_path: &Path,
        context: &HashMap<String, String>,
        fs_type: &str,
        mount_flags: &[String],
    ) -> Result<()> {
        let _guard = self.locks.lock(volume_id)?;

        fs::create_dir_all(staging_path)?;

        if ensure_mount_point(self.mounter.as_ref(), staging_path)? {
            info!(volume_id, target = %staging_path.display(), "volume already staged");
            return Ok(());
        }

        let capacity = get_ci(context, CAPACITY_FIELD).ok_or(Error::MissingContext(CAPACITY_FIELD))?;
        let capacity: u64 = capacity.trim().parse().map_err(|_| Error::InvalidContext {
            key: CAPACITY_FIELD,
            value: capacity.to_string(),
        })?;
        let tuning = DeviceTuning::from_context(context)?;

        let device = DeviceHandle::allocate(&self.control, self.mounter.clone())?;
        let dev_path = device.dev_path();
        debug!(volume_id, device = %dev_path, capacity, ?tuning, "configuring zram device");

        let provisioned = device.configure(capacity, &tuning).and_then(|()| {
            device
                .format_and_mount(staging_path, fs_type, mount_flags)
                .map_err(|e| Error::StageMount {
                    volume_id: volume_id.to_string(),
                    device: dev_path.clone(),
                    target: staging_path.display().to_string(),
                    source: Box::new(e),
                })
        });

        if let Err(e) = provisioned {
            log_cleanup_error("release zram device", || device.release());
            return Err(e);
        }

        info!(
            volume_id,
            device = %dev_path,
            target = %staging_path.display(),
            "volume staged"
        );
        Ok(())
    }

    /// Unmount the device staged at `staging_path` and return it to the
    /// kernel.
    ///
    /// The device is only released once every mount of it is gone.
    pub fn unstage_volume(&self, volume_id: &str, staging_path: &Path) -> Result<()> {
        let _guard = self.locks.lock(volume_id)?;

        let device = DeviceHandle::from_mount_path(&self.control, self.mounter.clone(), staging_path)?;
        let dev_path = device.dev_path();
        debug!(volume_id, device = %dev_path, target = %staging_path.display(), "unstaging volume");

        device.unmount_and_cleanup()?;
        device.release()?;

        info!(
            volume_id,
            device = %dev_path,
            target = %staging_path.display(),
            "volume unstaged"
        );
        Ok(())
    }

    /// Bind mount the staged volume at `target`.
    pub fn publish_volume(
        &self,
        volume_id: &str,
        staging_path: &Path,
        target: &Path,
        read_only: bool,
    ) -> Result<()> {
        if ensure_mount_point(self.mounter.as_ref(), target)? {
            debug!(volume_id, target = %target.display(), "already published");
            return Ok(());
        }

        let mut options = vec!["bind".to_string()];
        if read_only {
            options.push("ro".to_string());
        }

        let source = staging_path.display().to_string();
        if let Err(e) = self.mounter.mount(&source, target, "", &options) {
            log_cleanup_error("remove publish target", || fs::remove_dir(target));
            return Err(e);
        }

        info!(volume_id, source = %source, target = %target.display(), read_only, "volume published");
        Ok(())
    }

    /// Remove the bind mount at `target` along with its directory.
    pub fn unpublish_volume(&self, volume_id: &str, target: &Path) -> Result<()> {
        self.mounter.cleanup_mount_point(target, true)?;
        info!(volume_id, target = %target.display(), "volume unpublished");
        Ok(())
    }

    pub fn volume_stats(&self, path: &Path) -> Result<VolumeStats> {
        match fs::symlink_metadata(path) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::PathNotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let stat = statvfs(path).map_err(|source| Error::Stats {
            path: path.display().to_string(),
            source,
        })?;

        let block_size = stat.fragment_size() as u64;
        let blocks = stat.blocks() as u64;
        let files = stat.files() as u64;
        let files_free = stat.files_free() as u64;

        Ok(VolumeStats {
            available_bytes: saturate(stat.blocks_available() as u64 * block_size),
            total_bytes: saturate(blocks * block_size),
            used_bytes: saturate(blocks.saturating_sub(stat.blocks_free() as u64) * block_size),
            total_inodes: saturate(files),
            free_inodes: saturate(files_free),
            used_inodes: saturate(files.saturating_sub(files_free)),
        })
    }
}

fn saturate(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
