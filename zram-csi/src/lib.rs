//! zram-csi: CSI driver exposing zram devices as node-local volumes.
//!
//! The controller only derives volume ids; the node allocates a zram device
//! on stage, formats and mounts it, and returns it to the kernel on unstage.

// Generated protobuf code has doc formatting issues
#![allow(clippy::doc_overindented_list_items)]
#![allow(clippy::doc_lazy_continuation)]
// tonic::Status is large by design (176 bytes)
#![allow(clippy::result_large_err)]

pub mod controller;
pub mod device;
pub mod driver;
pub mod error;
pub mod identity;
pub mod mount;
pub mod node;
pub mod volume;

pub mod csi {
    tonic::include_proto!("csi.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("csi_descriptor");
}

pub use driver::{Config, Driver};
pub use error::{Error, Result};
pub use volume::ZramVolume;

#[cfg(test)]
pub(crate) mod test_util;
