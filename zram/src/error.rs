//! Error types for zram device control.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ZramError>;

#[derive(Debug, Error)]
pub enum ZramError {
    #[error("failed to allocate zram device via {path}: {source}")]
    HotAdd { path: PathBuf, source: io::Error },

    #[error("invalid device number from {path}: {value:?}")]
    InvalidDeviceNumber { path: PathBuf, value: String },

    #[error("failed to release zram{id} via {path}: {source}")]
    HotRemove {
        id: u32,
        path: PathBuf,
        source: io::Error,
    },

    #[error("failed to write {value:?} to {path}: {source}")]
    Attribute {
        path: PathBuf,
        value: String,
        source: io::Error,
    },

    #[error("invalid zram device: {device:?}")]
    InvalidDevice { device: String },
}
