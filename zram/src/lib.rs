//! Linux kernel zram device support.
//!
//! zram devices are RAM-backed block devices whose pages are compressed in
//! memory. They are allocated and released through the `zram-control` class
//! files and configured through per-device sysfs attributes.
//!
//! Based on https://docs.kernel.org/admin-guide/blockdev/zram.html
//!
//! # Example
//!
//! ```ignore
//! use zram::ZramControl;
//!
//! let control = ZramControl::default();
//! let device = control.hot_add()?;
//! device.reset()?;
//! device.set_disk_size(1 << 30)?;
//! // ... format, mount, use, unmount ...
//! device.remove()?;
//! ```

mod device;
mod error;

pub use device::{DEVICE_PREFIX, ZramControl, ZramDevice, parse_device_id};
pub use error::{Result, ZramError};
