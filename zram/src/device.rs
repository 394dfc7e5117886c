//! zram device allocation and sysfs configuration.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, ZramError};

/// Name prefix shared by every zram block device (`/dev/zram0`, ...).
pub const DEVICE_PREFIX: &str = "zram";

const CONTROL_DIR: &str = "class/zram-control";
const HOT_ADD: &str = "hot_add";
const HOT_REMOVE: &str = "hot_remove";

/// Entry point to the kernel zram allocator.
///
/// Paths are rooted at `sys_root` and `dev_root` so the control interface can
/// be pointed at a scratch tree.
#[derive(Debug, Clone)]
pub struct ZramControl {
    sys_root: PathBuf,
    dev_root: PathBuf,
}

impl Default for ZramControl {
    fn default() -> Self {
        Self::new("/sys", "/dev")
    }
}

impl ZramControl {
    pub fn new(sys_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sys_root: sys_root.into(),
            dev_root: dev_root.into(),
        }
    }

    fn control_file(&self, name: &str) -> PathBuf {
        self.sys_root.join(CONTROL_DIR).join(name)
    }

    /// Allocate a new device.
    ///
    /// Reading `hot_add` makes the kernel create a device and return its
    /// number. Fails if the kernel has no device to hand out.
    pub fn hot_add(&self) -> Result<ZramDevice> {
        let path = self.control_file(HOT_ADD);
        let data = fs::read_to_string(&path).map_err(|source| ZramError::HotAdd {
            path: path.clone(),
            source,
        })?;
        let id = data
            .trim()
            .parse::<u32>()
            .map_err(|_| ZramError::InvalidDeviceNumber {
                path,
                value: data.trim().to_string(),
            })?;

        let device = self.device(id);
        info!(device = %device.dev_path().display(), "zram device allocated");
        Ok(device)
    }

    /// Handle for an existing device number.
    pub fn device(&self, id: u32) -> ZramDevice {
        let name = format!("{DEVICE_PREFIX}{id}");
        ZramDevice {
            id,
            dev_path: self.dev_root.join(&name),
            sys_path: self.sys_root.join("block").join(&name),
            hot_remove: self.control_file(HOT_REMOVE),
        }
    }

    /// Handle for the device named by a block device path such as
    /// `/dev/zram3`. Anything that is not a zram device is rejected.
    pub fn device_from_path(&self, device: &str) -> Result<ZramDevice> {
        parse_device_id(device).map(|id| self.device(id))
    }
}

/// Parse the device number out of a zram device path or name.
///
/// Only `zram<N>` basenames are accepted; partitions, other block devices and
/// empty strings all fail.
pub fn parse_device_id(device: &str) -> Result<u32> {
    let invalid = || ZramError::InvalidDevice {
        device: device.to_string(),
    };

    let name = Path::new(device)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(invalid)?;
    let number = name.strip_prefix(DEVICE_PREFIX).ok_or_else(invalid)?;
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    number.parse().map_err(|_| invalid())
}

/// One kernel zram device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZramDevice {
    id: u32,
    dev_path: PathBuf,
    sys_path: PathBuf,
    hot_remove: PathBuf,
}

impl ZramDevice {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Block device node, e.g. `/dev/zram0`.
    pub fn dev_path(&self) -> &Path {
        &self.dev_path
    }

    /// Attribute directory, e.g. `/sys/block/zram0`.
    pub fn sys_path(&self) -> &Path {
        &self.sys_path
    }

    fn write_attribute(&self, name: &str, value: &str) -> Result<()> {
        let path = self.sys_path.join(name);
        debug!(path = %path.display(), value, "write zram attribute");
        write_control(&path, value).map_err(|source| ZramError::Attribute {
            path,
            value: value.to_string(),
            source,
        })
    }

    /// Drop all data and configuration, returning the device to the
    /// unconfigured state.
    pub fn reset(&self) -> Result<()> {
        self.write_attribute("reset", "1")
    }

    /// Set the uncompressed size in bytes. Must follow a reset.
    pub fn set_disk_size(&self, bytes: u64) -> Result<()> {
        self.write_attribute("disksize", &bytes.to_string())
    }

    /// Cap the memory used for compressed pages. Zero disables the limit.
    pub fn set_mem_limit(&self, bytes: u64) -> Result<()> {
        self.write_attribute("mem_limit", &bytes.to_string())
    }

    /// Must be set before the disk size.
    pub fn set_max_comp_streams(&self, streams: u32) -> Result<()> {
        self.write_attribute("max_comp_streams", &streams.to_string())
    }

    /// Must be set before the disk size. The kernel default is `lzo-rle`.
    pub fn set_comp_algorithm(&self, algorithm: &str) -> Result<()> {
        self.write_attribute("comp_algorithm", algorithm)
    }

    /// Return the device number to the kernel pool.
    ///
    /// The device must not be mounted anywhere.
    pub fn remove(self) -> Result<()> {
        write_control(&self.hot_remove, &self.id.to_string()).map_err(|source| {
            ZramError::HotRemove {
                id: self.id,
                path: self.hot_remove.clone(),
                source,
            }
        })?;
        info!(device = %self.dev_path.display(), "zram device removed");
        Ok(())
    }
}

fn write_control(path: &Path, value: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(value.as_bytes())?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Lay out the control and attribute files the kernel would provide for
    /// a single device.
    fn fake_sysfs(next_id: u32) -> (TempDir, ZramControl) {
        let dir = TempDir::new().unwrap();
        let control_dir = dir.path().join("sys").join(CONTROL_DIR);
        fs::create_dir_all(&control_dir).unwrap();
        fs::write(control_dir.join(HOT_ADD), format!("{next_id}\n")).unwrap();
        fs::write(control_dir.join(HOT_REMOVE), "").unwrap();

        let block_dir = dir.path().join(format!("sys/block/zram{next_id}"));
        fs::create_dir_all(&block_dir).unwrap();
        for attr in [
            "reset",
            "disksize",
            "mem_limit",
            "max_comp_streams",
            "comp_algorithm",
        ] {
            fs::write(block_dir.join(attr), "").unwrap();
        }

        let control = ZramControl::new(dir.path().join("sys"), dir.path().join("dev"));
        (dir, control)
    }

    #[test]
    fn hot_add_derives_paths_from_allocated_id() {
        let (dir, control) = fake_sysfs(3);
        let device = control.hot_add().unwrap();

        assert_eq!(device.id(), 3);
        assert_eq!(device.dev_path(), dir.path().join("dev/zram3"));
        assert_eq!(device.sys_path(), dir.path().join("sys/block/zram3"));
    }

    #[test]
    fn hot_add_rejects_garbage_device_number() {
        let (dir, control) = fake_sysfs(0);
        fs::write(dir.path().join("sys").join(CONTROL_DIR).join(HOT_ADD), "x").unwrap();

        let err = control.hot_add().unwrap_err();
        assert!(matches!(err, ZramError::InvalidDeviceNumber { .. }));
    }

    #[test]
    fn hot_add_fails_without_control_interface() {
        let dir = TempDir::new().unwrap();
        let control = ZramControl::new(dir.path(), dir.path());

        let err = control.hot_add().unwrap_err();
        assert!(matches!(err, ZramError::HotAdd { .. }));
    }

    #[test]
    fn attributes_are_written_to_sysfs() {
        let (_dir, control) = fake_sysfs(0);
        let device = control.device(0);

        device.reset().unwrap();
        device.set_comp_algorithm("zstd").unwrap();
        device.set_max_comp_streams(4).unwrap();
        device.set_disk_size(1_048_576).unwrap();
        device.set_mem_limit(524_288).unwrap();

        let read = |name: &str| fs::read_to_string(device.sys_path().join(name)).unwrap();
        assert_eq!(read("reset"), "1");
        assert_eq!(read("comp_algorithm"), "zstd");
        assert_eq!(read("max_comp_streams"), "4");
        assert_eq!(read("disksize"), "1048576");
        assert_eq!(read("mem_limit"), "524288");
    }

    #[test]
    fn attribute_write_fails_for_missing_device() {
        let (_dir, control) = fake_sysfs(0);
        let err = control.device(9).set_disk_size(1).unwrap_err();
        assert!(matches!(err, ZramError::Attribute { .. }));
    }

    #[test]
    fn remove_writes_id_to_hot_remove() {
        let (dir, control) = fake_sysfs(5);
        control.device(5).remove().unwrap();

        let written =
            fs::read_to_string(dir.path().join("sys").join(CONTROL_DIR).join(HOT_REMOVE)).unwrap();
        assert_eq!(written, "5");
    }

    #[test]
    fn parse_device_id_accepts_zram_devices() {
        assert_eq!(parse_device_id("/dev/zram0").unwrap(), 0);
        assert_eq!(parse_device_id("zram12").unwrap(), 12);
    }

    #[test]
    fn parse_device_id_fails_closed() {
        for device in ["", "/dev/sda1", "/dev/zram", "/dev/zram1p1", "/dev/zram-1", "tmpfs"] {
            assert!(parse_device_id(device).is_err(), "{device:?} accepted");
        }
    }

    #[test]
    fn device_from_path_uses_control_roots() {
        let (dir, control) = fake_sysfs(0);
        let device = control.device_from_path("/dev/zram7").unwrap();
        assert_eq!(device.dev_path(), dir.path().join("dev/zram7"));
    }
}
