//! A zram device seen through the mount table.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};
use zram::{ZramControl, ZramDevice};

use crate::error::{Error, Result};
use crate::mount::Mounter;
use crate::volume::{COMP_ALGORITHM_FIELD, MAX_COMP_STREAMS_FIELD, MEM_LIMIT_FIELD, get_ci};

/// Optional device attributes taken from the volume context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceTuning {
    pub comp_algorithm: Option<String>,
    pub max_comp_streams: Option<u32>,
    pub mem_limit: Option<u64>,
}

impl DeviceTuning {
    pub fn from_context(context: &HashMap<String, String>) -> Result<Self> {
        let comp_algorithm = get_ci(context, COMP_ALGORITHM_FIELD)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let max_comp_streams = parse_context(context, MAX_COMP_STREAMS_FIELD, "maxCompStreams")?;
        let mem_limit = parse_context(context, MEM_LIMIT_FIELD, "memLimit")?;
        Ok(Self {
            comp_algorithm,
            max_comp_streams,
            mem_limit,
        })
    }
}

fn parse_context<T: std::str::FromStr>(
    context: &HashMap<String, String>,
    field: &str,
    key: &'static str,
) -> Result<Option<T>> {
    get_ci(context, field)
        .map(|value| {
            value.trim().parse().map_err(|_| Error::InvalidContext {
                key,
                value: value.to_string(),
            })
        })
        .transpose()
}

/// One zram device plus the mount driver used to find its mounts.
pub struct DeviceHandle {
    device: ZramDevice,
    mounter: Arc<dyn Mounter>,
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl DeviceHandle {
    /// Ask the kernel for a fresh device.
    pub fn allocate(control: &ZramControl, mounter: Arc<dyn Mounter>) -> Result<Self> {
        let device = control.hot_add().map_err(Error::Allocate)?;
        Ok(Self { device, mounter })
    }

    /// Recover the device mounted at `path`.
    ///
    /// Symlinks in `path` are resolved before the mount table lookup. Fails
    /// unless the backing device is a zram device.
    pub fn from_mount_path(
        control: &ZramControl,
        mounter: Arc<dyn Mounter>,
        path: &Path,
    ) -> Result<Self> {
        let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mounts = mounter.list()?;
        // With stacked mounts only the first entry is considered.
        let backing = mounts
            .iter()
            .find(|mp| mp.path == resolved || mp.path == path)
            .map(|mp| mp.device.as_str())
            .unwrap_or_default();

        let device = control
            .device_from_path(backing)
            .map_err(|source| Error::UnknownDevice {
                target: path.display().to_string(),
                source,
            })?;
        Ok(Self { device, mounter })
    }

    pub fn id(&self) -> u32 {
        self.device.id()
    }

    pub fn dev_path(&self) -> String {
        self.device.dev_path().display().to_string()
    }

    /// Reset the device and apply size and tuning in the order the kernel
    /// accepts them.
    pub fn configure(&self, disk_size: u64, tuning: &DeviceTuning) -> Result<()> {
        let configure = || -> zram::Result<()> {
            self.device.reset()?;
            if let Some(algorithm) = &tuning.comp_algorithm {
                self.device.set_comp_algorithm(algorithm)?;
            }
            if let Some(streams) = tuning.max_comp_streams {
                self.device.set_max_comp_streams(streams)?;
            }
            self.device.set_disk_size(disk_size)?;
            if let Some(limit) = tuning.mem_limit {
                self.device.set_mem_limit(limit)?;
            }
            Ok(())
        };
        configure().map_err(|source| Error::Configure {
            device: self.dev_path(),
            source,
        })
    }

    /// Number of mount table entries backed by this device.
    pub fn ref_count(&self) -> Result<usize> {
        let dev_path = self.dev_path();
        let mounts = self.mounter.list()?;
        Ok(mounts.iter().filter(|mp| mp.device == dev_path).count())
    }

    pub fn format_and_mount(&self, target: &Path, fs_type: &str, options: &[String]) -> Result<()> {
        self.mounter
            .format_and_mount(&self.dev_path(), target, fs_type, options)
    }

    /// Unmount every mount of this device and remove the mount directories.
    ///
    /// All entries are attempted; failures are reported together.
    pub fn unmount_and_cleanup(&self) -> Result<()> {
        let dev_path = self.dev_path();
        let mut failures = Vec::new();

        for mp in self.mounter.list()? {
            if mp.device != dev_path {
                continue;
            }
            match self.mounter.cleanup_mount_point(&mp.path, false) {
                Ok(()) => info!(device = %dev_path, target = %mp.path.display(), "unmounted"),
                Err(e) => {
                    error!(device = %dev_path, target = %mp.path.display(), error = %e, "unmount failed");
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::UnmountAll {
                device: dev_path,
                failures,
            })
        }
    }

    /// Return the device to the kernel. Refused while any mount remains.
    pub fn release(self) -> Result<()> {
        let refs = self.ref_count()?;
        if refs > 0 {
            return Err(Error::DeviceBusy {
                device: self.dev_path(),
                refs,
            });
        }
        let device = self.dev_path();
        self.device
            .remove()
            .map_err(|source| Error::Release { device, source })
    }
}
