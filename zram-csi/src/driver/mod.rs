//! CSI driver implementation.
//!
//! - `Config`: driver configuration
//! - `Driver`: runs the gRPC servers
//! - `DriverState`: staging state machine shared by the services
//! - `VolumeLocks`: per-volume operation locks

mod locks;
mod state;

pub use locks::{VolumeLockGuard, VolumeLocks};
pub use state::{DriverState, VolumeStats};

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::UnixListener;
use tonic::transport::Server;
use tracing::{info, warn};

use crate::controller::ControllerService;
use crate::csi::{
    self, FILE_DESCRIPTOR_SET, controller_server::ControllerServer,
    identity_server::IdentityServer, node_server::NodeServer,
};
use crate::error::{Error, Result};
use crate::identity::IdentityService;
use crate::node::NodeService;

/// Execute a cleanup operation, logging any errors without failing.
///
/// Cleanup failures must not mask the error that triggered the cleanup.
fn log_cleanup_error<F, E>(operation: &str, f: F)
where
    F: FnOnce() -> std::result::Result<(), E>,
    E: std::fmt::Display,
{
    if let Err(e) = f() {
        warn!(operation, error = %e, "cleanup failed");
    }
}

pub const DRIVER_NAME: &str = "zram.csi.k8s.io";
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Topology segment key identifying the node that owns a volume.
pub const TOPOLOGY_KEY_NODE: &str = "topology.hostpath.csi/node";

/// Volume context key carrying the requested size in bytes.
pub const CAPACITY_FIELD: &str = "capacity";

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub version: String,
    pub node_id: String,
    pub endpoint: String,
    pub enable_get_volume_stats: bool,
    pub enable_topology: bool,
    /// Root of the sysfs tree holding the zram control files.
    pub sysfs_root: PathBuf,
    /// Directory holding the zram block device nodes.
    pub dev_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: DRIVER_NAME.to_string(),
            version: DRIVER_VERSION.to_string(),
            node_id: default_node_id(),
            endpoint: "unix:///tmp/csi.sock".to_string(),
            enable_get_volume_stats: true,
            enable_topology: true,
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
        }
    }
}

impl Config {
    /// Topology pinning volumes to this node, if topology is enabled.
    pub fn topology(&self) -> Option<csi::Topology> {
        self.enable_topology.then(|| csi::Topology {
            segments: HashMap::from([(TOPOLOGY_KEY_NODE.to_string(), self.node_id.clone())]),
        })
    }
}

pub fn default_node_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// The CSI driver.
pub struct Driver {
    state: Arc<DriverState>,
}

impl Driver {
    pub fn new(config: Config) -> Self {
        Self {
            state: Arc::new(DriverState::new(config)),
        }
    }

    /// Run the CSI driver.
    pub async fn run(&self) -> Result<()> {
        let endpoint = &self.state.config.endpoint;
        info!(
            name = %self.state.config.name,
            version = %self.state.config.version,
            node_id = %self.state.config.node_id,
            endpoint,
            "starting CSI driver"
        );

        if let Some(path) = endpoint.strip_prefix("unix://") {
            self.run_unix(path).await
        } else if let Some(addr) = endpoint.strip_prefix("tcp://") {
            let addr: SocketAddr = addr.parse().map_err(|_| Error::InvalidEndpoint {
                endpoint: endpoint.clone(),
            })?;
            self.run_tcp(addr).await
        } else {
            Err(Error::InvalidEndpoint {
                endpoint: endpoint.clone(),
            })
        }
    }

    async fn run_unix(&self, path: &str) -> Result<()> {
        // A socket left behind by a previous run would make bind fail.
        if let Err(e) = fs::remove_file(path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(e.into());
        }
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)?;
        let incoming = tokio_stream::wrappers::UnixListenerStream::new(listener);

        self.serve_grpc(incoming).await
    }

    async fn run_tcp(&self, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);

        self.serve_grpc(incoming).await
    }

    async fn serve_grpc<S, IO, E>(&self, incoming: S) -> Result<()>
    where
        S: tokio_stream::Stream<Item = std::result::Result<IO, E>> + Send + 'static,
        IO: tokio::io::AsyncRead
            + tokio::io::AsyncWrite
            + tonic::transport::server::Connected
            + Send
            + Unpin
            + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        Server::builder()
            .add_service(reflection)
            .add_service(IdentityServer::new(IdentityService::new(
                self.state.clone(),
            )))
            .add_service(ControllerServer::new(ControllerService::new(
                self.state.clone(),
            )))
            .add_service(NodeServer::new(NodeService::new(self.state.clone())))
            .serve_with_incoming(incoming)
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        Ok(())
    }
}
