//! CSI Identity service implementation.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::csi;
use crate::driver::DriverState;

pub struct IdentityService {
    state: Arc<DriverState>,
}

impl IdentityService {
    pub fn new(state: Arc<DriverState>) -> Self {
        Self { state }
    }
}

fn service_capability(t: csi::plugin_capability::service::Type) -> csi::PluginCapability {
    csi::PluginCapability {
        r#type: Some(csi::plugin_capability::Type::Service(
            csi::plugin_capability::Service { r#type: t as i32 },
        )),
    }
}

#[tonic::async_trait]
impl csi::identity_server::Identity for IdentityService {
    async fn get_plugin_info(
        &self,
        _request: Request<csi::GetPluginInfoRequest>,
    ) -> Result<Response<csi::GetPluginInfoResponse>, Status> {
        Ok(Response::new(csi::GetPluginInfoResponse {
            name: self.state.config.name.clone(),
            vendor_version: self.state.config.version.clone(),
            manifest: Default::default(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<csi::GetPluginCapabilitiesRequest>,
    ) -> Result<Response<csi::GetPluginCapabilitiesResponse>, Status> {
        use csi::plugin_capability::service::Type;

        let mut capabilities = vec![service_capability(Type::ControllerService)];
        if self.state.config.enable_topology {
            capabilities.push(service_capability(Type::VolumeAccessibilityConstraints));
        }

        Ok(Response::new(csi::GetPluginCapabilitiesResponse {
            capabilities,
        }))
    }

    async fn probe(
        &self,
        _request: Request<csi::ProbeRequest>,
    ) -> Result<Response<csi::ProbeResponse>, Status> {
        Ok(Response::new(csi::ProbeResponse { ready: Some(true) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csi;
    use crate::driver::Config;
    use crate::test_util::TestFixture;

    fn has_service(caps: &[csi::PluginCapability], t: csi::plugin_capability::service::Type) -> bool {
        caps.iter().any(|cap| {
            matches!(
                &cap.r#type,
                Some(csi::plugin_capability::Type::Service(svc)) if svc.r#type == t as i32
            )
        })
    }

    #[tokio::test]
    async fn get_plugin_info_returns_valid_name_and_version() {
        let fixture = TestFixture::new();
        let service = fixture.identity_service();

        let response = csi::identity_server::Identity::get_plugin_info(
            &service,
            Request::new(csi::GetPluginInfoRequest {}),
        )
        .await
        .expect("GetPluginInfo should succeed");

        let info = response.into_inner();

        assert_eq!(info.name, "zram.csi.k8s.io");
        assert!(info.name.len() <= 63);
        assert!(!info.vendor_version.is_empty());
    }

    #[tokio::test]
    async fn get_plugin_capabilities_advertises_topology_when_enabled() {
        use csi::plugin_capability::service::Type;

        let fixture = TestFixture::new();
        let response = csi::identity_server::Identity::get_plugin_capabilities(
            &fixture.identity_service(),
            Request::new(csi::GetPluginCapabilitiesRequest {}),
        )
        .await
        .expect("GetPluginCapabilities should succeed");

        let caps = response.into_inner().capabilities;
        assert!(has_service(&caps, Type::ControllerService));
        assert!(has_service(&caps, Type::VolumeAccessibilityConstraints));
    }

    #[tokio::test]
    async fn get_plugin_capabilities_omits_topology_when_disabled() {
        use csi::plugin_capability::service::Type;

        let fixture = TestFixture::with_config(|config: &mut Config| config.enable_topology = false);
        let response = csi::identity_server::Identity::get_plugin_capabilities(
            &fixture.identity_service(),
            Request::new(csi::GetPluginCapabilitiesRequest {}),
        )
        .await
        .expect("GetPluginCapabilities should succeed");

        let caps = response.into_inner().capabilities;
        assert!(has_service(&caps, Type::ControllerService));
        assert!(!has_service(&caps, Type::VolumeAccessibilityConstraints));
    }

    #[tokio::test]
    async fn probe_reports_ready() {
        let fixture = TestFixture::new();
        let response = csi::identity_server::Identity::probe(
            &fixture.identity_service(),
            Request::new(csi::ProbeRequest {}),
        )
        .await
        .expect("Probe should succeed");

        assert_eq!(response.into_inner().ready, Some(true));
    }
}
