//! Error types for the CSI driver.

use std::io;

use thiserror::Error;
use tonic::Status;

pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for validating required fields.
///
/// Returns `INVALID_ARGUMENT` status if the field is missing or empty.
pub trait Require<T> {
    fn require(self, name: &str) -> std::result::Result<T, Status>;
}

impl Require<String> for String {
    fn require(self, name: &str) -> std::result::Result<String, Status> {
        if self.is_empty() {
            Err(Status::invalid_argument(format!("{name} missing in request")))
        } else {
            Ok(self)
        }
    }
}

impl<T> Require<T> for Option<T> {
    fn require(self, name: &str) -> std::result::Result<T, Status> {
        self.ok_or_else(|| Status::invalid_argument(format!("{name} missing in request")))
    }
}

/// Failure classes reported to the container orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller bug; never retried automatically.
    InvalidArgument,
    /// Another operation holds the volume; retry with backoff.
    OperationInProgress,
    /// Device, sysfs, mount or mount-table failure.
    Internal,
    /// A path that must exist does not.
    NotFound,
}

/// CSI driver errors with structured context.
#[derive(Debug, Error)]
pub enum Error {
    #[error("an operation with the given volume ID {0} already exists")]
    OperationInProgress(String),

    #[error("invalid volume ID {0:?}: expected source#subDir[#uuid]")]
    InvalidVolumeId(String),

    #[error("{0} is a required parameter")]
    MissingParameter(&'static str),

    #[error("invalid parameter {0} in storage class")]
    InvalidParameter(String),

    #[error("{0}")]
    InvalidCapabilities(&'static str),

    #[error("invalid endpoint: {endpoint}")]
    InvalidEndpoint { endpoint: String },

    #[error("expected {0} field in volume context")]
    MissingContext(&'static str),

    #[error("invalid {key} in volume context: {value:?}")]
    InvalidContext { key: &'static str, value: String },

    #[error("failed to create zram device: {0}")]
    Allocate(#[source] zram::ZramError),

    #[error("failed to configure zram device {device}: {source}")]
    Configure {
        device: String,
        source: zram::ZramError,
    },

    #[error("failed to remove zram device {device}: {source}")]
    Release {
        device: String,
        source: zram::ZramError,
    },

    #[error("zram device {device} is still mounted ({refs} references)")]
    DeviceBusy { device: String, refs: usize },

    #[error("failed to get zram device mounted at {target}: {source}")]
    UnknownDevice {
        target: String,
        source: zram::ZramError,
    },

    #[error("volume({volume_id}) mount {device:?} on {target:?} failed: {source}")]
    StageMount {
        volume_id: String,
        device: String,
        target: String,
        source: Box<Error>,
    },

    #[error("failed to mount {mount_source} on {target}: {source}")]
    Mount {
        mount_source: String,
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to unmount {target}: {source}")]
    Unmount { target: String, source: io::Error },

    #[error("failed to format {device} as {fs_type}: {message}")]
    Format {
        device: String,
        fs_type: String,
        message: String,
    },

    #[error("too many mount options: {count} exceeds maximum of {max}")]
    TooManyMountOptions { count: usize, max: usize },

    #[error("mount at {target} is not traversable: {source}")]
    CorruptedMount { target: String, source: io::Error },

    #[error("failed to unmount {device}: {}", join_errors(.failures))]
    UnmountAll { device: String, failures: Vec<Error> },

    #[error("path {0} does not exist")]
    PathNotFound(String),

    #[error("failed to statfs {path}: {source}")]
    Stats { path: String, source: nix::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::OperationInProgress(_) => ErrorKind::OperationInProgress,

            Error::InvalidVolumeId(_)
            | Error::MissingParameter(_)
            | Error::InvalidParameter(_)
            | Error::InvalidCapabilities(_)
            | Error::InvalidEndpoint { .. } => ErrorKind::InvalidArgument,

            Error::PathNotFound(_) => ErrorKind::NotFound,

            Error::MissingContext(_)
            | Error::InvalidContext { .. }
            | Error::Allocate(_)
            | Error::Configure { .. }
            | Error::Release { .. }
            | Error::DeviceBusy { .. }
            | Error::UnknownDevice { .. }
            | Error::StageMount { .. }
            | Error::Mount { .. }
            | Error::Unmount { .. }
            | Error::Format { .. }
            | Error::TooManyMountOptions { .. }
            | Error::CorruptedMount { .. }
            | Error::UnmountAll { .. }
            | Error::Stats { .. }
            | Error::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Errors compare by class and rendered message; wrapped OS errors carry no
/// identity of their own.
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.to_string() == other.to_string()
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::InvalidArgument => Status::invalid_argument(message),
            ErrorKind::OperationInProgress => Status::aborted(message),
            ErrorKind::NotFound => Status::not_found(message),
            ErrorKind::Internal => Status::internal(message),
        }
    }
}
