//! CSI Controller service implementation.
//!
//! The controller holds no resources. CreateVolume derives the volume id and
//! context from the storage class parameters; the node provisions the device
//! when the volume is staged.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::info;

use crate::csi;
use crate::driver::{CAPACITY_FIELD, DriverState};
use crate::error::{Error, Require, Result as DriverResult};
use crate::volume::{ZramVolume, set_key_value_in_map};

pub struct ControllerService {
    state: Arc<DriverState>,
}

impl ControllerService {
    pub fn new(state: Arc<DriverState>) -> Self {
        Self { state }
    }
}

/// Accept any non-empty list of filesystem capabilities.
pub fn validate_capabilities(caps: &[csi::VolumeCapability]) -> DriverResult<()> {
    if caps.is_empty() {
        return Err(Error::InvalidCapabilities(
            "volume capabilities missing in request",
        ));
    }
    let is_block = |cap: &csi::VolumeCapability| {
        matches!(cap.access_type, Some(csi::volume_capability::AccessType::Block(_)))
    };
    if caps.iter().any(is_block) {
        return Err(Error::InvalidCapabilities(
            "block volume capability not supported",
        ));
    }
    Ok(())
}

#[tonic::async_trait]
impl csi::controller_server::Controller for ControllerService {
    async fn create_volume(
        &self,
        request: Request<csi::CreateVolumeRequest>,
    ) -> Result<Response<csi::CreateVolumeResponse>, Status> {
        let req = request.into_inner();
        let name = req.name.require("volume name")?;
        validate_capabilities(&req.volume_capabilities)?;

        let required_bytes = req
            .capacity_range
            .as_ref()
            .map(|r| r.required_bytes)
            .unwrap_or_default();
        let mut parameters = req.parameters;
        let volume = ZramVolume::from_parameters(&name, required_bytes, &parameters)?;
        set_key_value_in_map(&mut parameters, CAPACITY_FIELD, required_bytes.to_string());

        let volume_id = volume.volume_id();
        info!(name, volume_id, required_bytes, "create volume");

        Ok(Response::new(csi::CreateVolumeResponse {
            volume: Some(csi::Volume {
                // Zero lets the provisioner use the size requested by the claim.
                capacity_bytes: 0,
                volume_id,
                volume_context: parameters,
                content_source: None,
                accessible_topology: self.state.config.topology().into_iter().collect(),
            }),
        }))
    }

    async fn delete_volume(
        &self,
        request: Request<csi::DeleteVolumeRequest>,
    ) -> Result<Response<csi::DeleteVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;

        // Devices are released on unstage; nothing is held here.
        info!(volume_id, "delete volume");
        Ok(Response::new(csi::DeleteVolumeResponse {}))
    }

    async fn controller_publish_volume(
        &self,
        _request: Request<csi::ControllerPublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerPublishVolumeResponse>, Status> {
        Err(Status::unimplemented("controller publish is not supported"))
    }

    async fn controller_unpublish_volume(
        &self,
        _request: Request<csi::ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerUnpublishVolumeResponse>, Status> {
        Err(Status::unimplemented("controller unpublish is not supported"))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<csi::ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<csi::ValidateVolumeCapabilitiesResponse>, Status> {
        let req = request.into_inner();
        req.volume_id.require("volume ID")?;
        validate_capabilities(&req.volume_capabilities)?;

        Ok(Response::new(csi::ValidateVolumeCapabilitiesResponse {
            confirmed: Some(csi::validate_volume_capabilities_response::Confirmed {
                volume_context: Default::default(),
                volume_capabilities: req.volume_capabilities,
                parameters: Default::default(),
                mutable_parameters: Default::default(),
            }),
            message: String::new(),
        }))
    }

    async fn list_volumes(
        &self,
        _request: Request<csi::ListVolumesRequest>,
    ) -> Result<Response<csi::ListVolumesResponse>, Status> {
        Err(Status::unimplemented("volume listing is not supported"))
    }

    async fn get_capacity(
        &self,
        _request: Request<csi::GetCapacityRequest>,
    ) -> Result<Response<csi::GetCapacityResponse>, Status> {
        Err(Status::unimplemented("capacity query is not supported"))
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<csi::ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<csi::ControllerGetCapabilitiesResponse>, Status> {
        use csi::controller_service_capability::rpc::Type;

        let capabilities = [Type::CreateDeleteVolume, Type::SingleNodeMultiWriter]
            .into_iter()
            .map(|t| csi::ControllerServiceCapability {
                r#type: Some(csi::controller_service_capability::Type::Rpc(
                    csi::controller_service_capability::Rpc { r#type: t as i32 },
                )),
            })
            .collect();

        Ok(Response::new(csi::ControllerGetCapabilitiesResponse {
            capabilities,
        }))
    }

    async fn create_snapshot(
        &self,
        _request: Request<csi::CreateSnapshotRequest>,
    ) -> Result<Response<csi::CreateSnapshotResponse>, Status> {
        Err(Status::unimplemented("snapshots are not supported"))
    }

    async fn delete_snapshot(
        &self,
        _request: Request<csi::DeleteSnapshotRequest>,
    ) -> Result<Response<csi::DeleteSnapshotResponse>, Status> {
        Err(Status::unimplemented("snapshots are not supported"))
    }

    async fn list_snapshots(
        &self,
        _request: Request<csi::ListSnapshotsRequest>,
    ) -> Result<Response<csi::ListSnapshotsResponse>, Status> {
        Err(Status::unimplemented("snapshots are not supported"))
    }

    async fn get_snapshot(
        &self,
        _request: Request<csi::GetSnapshotRequest>,
    ) -> Result<Response<csi::GetSnapshotResponse>, Status> {
        Err(Status::unimplemented("snapshots are not supported"))
    }

    async fn controller_expand_volume(
        &self,
        _request: Request<csi::ControllerExpandVolumeRequest>,
    ) -> Result<Response<csi::ControllerExpandVolumeResponse>, Status> {
        Err(Status::unimplemented("volume expansion is not supported"))
    }

    async fn controller_get_volume(
        &self,
        _request: Request<csi::ControllerGetVolumeRequest>,
    ) -> Result<Response<csi::ControllerGetVolumeResponse>, Status> {
        Err(Status::unimplemented("volume lookup is not supported"))
    }

    async fn controller_modify_volume(
        &self,
        _request: Request<csi::ControllerModifyVolumeRequest>,
    ) -> Result<Response<csi::ControllerModifyVolumeResponse>, Status> {
        Err(Status::unimplemented("volume modification is not supported"))
    }
}
