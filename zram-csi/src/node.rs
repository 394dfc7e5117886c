//! CSI Node service implementation.
//!
//! Thin gRPC layer over `DriverState`. Every state-machine call touches the
//! mount table, sysfs or mkfs, so it runs on the blocking pool.

use std::path::PathBuf;
use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::csi;
use crate::driver::DriverState;
use crate::error::{Require, Result as DriverResult};

pub struct NodeService {
    state: Arc<DriverState>,
}

impl NodeService {
    pub fn new(state: Arc<DriverState>) -> Self {
        Self { state }
    }

    /// Run `f` against the driver state on a blocking worker.
    async fn blocking<T, F>(&self, f: F) -> Result<T, Status>
    where
        T: Send + 'static,
        F: FnOnce(&DriverState) -> DriverResult<T> + Send + 'static,
    {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || f(state.as_ref()))
            .await
            .map_err(|e| Status::internal(format!("node operation aborted: {e}")))?
            .map_err(Status::from)
    }
}

/// Filesystem type and mount flags of a mount capability.
fn mount_parameters(cap: &csi::VolumeCapability) -> Result<(String, Vec<String>), Status> {
    match &cap.access_type {
        Some(csi::volume_capability::AccessType::Mount(mount)) => {
            Ok((mount.fs_type.clone(), mount.mount_flags.clone()))
        }
        Some(csi::volume_capability::AccessType::Block(_)) => {
            Err(Status::unimplemented("block volumes are not supported"))
        }
        None => Ok((String::new(), Vec::new())),
    }
}

fn usage(unit: csi::volume_usage::Unit, available: i64, total: i64, used: i64) -> csi::VolumeUsage {
    csi::VolumeUsage {
        available,
        total,
        used,
        unit: unit as i32,
    }
}

#[tonic::async_trait]
impl csi::node_server::Node for NodeService {
    async fn node_stage_volume(
        &self,
        request: Request<csi::NodeStageVolumeRequest>,
    ) -> Result<Response<csi::NodeStageVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;
        let volume_cap = req.volume_capability.require("volume capability")?;
        let staging_path = req.staging_target_path.require("staging target path")?;
        let (fs_type, mount_flags) = mount_parameters(&volume_cap)?;
        let context = req.volume_context;

        self.blocking(move |state| {
            state.stage_volume(
                &volume_id,
                &PathBuf::from(staging_path),
                &context,
                &fs_type,
                &mount_flags,
            )
        })
        .await?;

        Ok(Response::new(csi::NodeStageVolumeResponse {}))
    }

    async fn node_unstage_volume(
        &self,
        request: Request<csi::NodeUnstageVolumeRequest>,
    ) -> Result<Response<csi::NodeUnstageVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;
        let staging_path = req.staging_target_path.require("staging target path")?;

        self.blocking(move |state| state.unstage_volume(&volume_id, &PathBuf::from(staging_path)))
            .await?;

        Ok(Response::new(csi::NodeUnstageVolumeResponse {}))
    }

    async fn node_publish_volume(
        &self,
        request: Request<csi::NodePublishVolumeRequest>,
    ) -> Result<Response<csi::NodePublishVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_cap = req.volume_capability.require("volume capability")?;
        let volume_id = req.volume_id.require("volume ID")?;
        let target_path = req.target_path.require("target path")?;
        let staging_path = req.staging_target_path.require("staging target path")?;
        mount_parameters(&volume_cap)?;
        let read_only = req.readonly;

        self.blocking(move |state| {
            state.publish_volume(
                &volume_id,
                &PathBuf::from(staging_path),
                &PathBuf::from(target_path),
                read_only,
            )
        })
        .await?;

        Ok(Response::new(csi::NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<csi::NodeUnpublishVolumeRequest>,
    ) -> Result<Response<csi::NodeUnpublishVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;
        let target_path = req.target_path.require("target path")?;

        self.blocking(move |state| state.unpublish_volume(&volume_id, &PathBuf::from(target_path)))
            .await?;

        Ok(Response::new(csi::NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_volume_stats(
        &self,
        request: Request<csi::NodeGetVolumeStatsRequest>,
    ) -> Result<Response<csi::NodeGetVolumeStatsResponse>, Status> {
        use csi::volume_usage::Unit;

        let req = request.into_inner();
        req.volume_id.require("volume ID")?;
        let volume_path = req.volume_path.require("volume path")?;

        let stats = self
            .blocking(move |state| state.volume_stats(&PathBuf::from(volume_path)))
            .await?;

        Ok(Response::new(csi::NodeGetVolumeStatsResponse {
            usage: vec![
                usage(
                    Unit::Bytes,
                    stats.available_bytes,
                    stats.total_bytes,
                    stats.used_bytes,
                ),
                usage(
                    Unit::Inodes,
                    stats.free_inodes,
                    stats.total_inodes,
                    stats.used_inodes,
                ),
            ],
            volume_condition: None,
        }))
    }

    async fn node_expand_volume(
        &self,
        _request: Request<csi::NodeExpandVolumeRequest>,
    ) -> Result<Response<csi::NodeExpandVolumeResponse>, Status> {
        Err(Status::unimplemented("volume expansion is not supported"))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<csi::NodeGetCapabilitiesRequest>,
    ) -> Result<Response<csi::NodeGetCapabilitiesResponse>, Status> {
        use csi::node_service_capability::rpc::Type;

        let mut types = vec![Type::StageUnstageVolume, Type::SingleNodeMultiWriter];
        if self.state.config.enable_get_volume_stats {
            types.push(Type::GetVolumeStats);
        }

        let capabilities = types
            .into_iter()
            .map(|t| csi::NodeServiceCapability {
                r#type: Some(csi::node_service_capability::Type::Rpc(
                    csi::node_service_capability::Rpc { r#type: t as i32 },
                )),
            })
            .collect();

        Ok(Response::new(csi::NodeGetCapabilitiesResponse {
            capabilities,
        }))
    }

    async fn node_get_info(
        &self,
        _request: Request<csi::NodeGetInfoRequest>,
    ) -> Result<Response<csi::NodeGetInfoResponse>, Status> {
        Ok(Response::new(csi::NodeGetInfoResponse {
            node_id: self.state.config.node_id.clone(),
            max_volumes_per_node: 0,
            accessible_topology: self.state.config.topology(),
        }))
    }
}
