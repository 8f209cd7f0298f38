//! CSI capability prober
//!
//! Connects to a driver, asks the Identity, Controller and Node services for
//! their capabilities and folds the three answers into one
//! [`CapabilityFeatures`]. A probe is all-or-nothing: any failed RPC fails the
//! whole probe.

use crate::crd::{CapabilityFeatures, ExpandMode};
use crate::csi::endpoint::{ConnectSettings, DriverEndpoint};
use crate::csi::proto::{
    controller_client::ControllerClient,
    controller_service_capability::{self, rpc::Type as ControllerRpc},
    identity_client::IdentityClient,
    node_client::NodeClient,
    node_service_capability::{self, rpc::Type as NodeRpc},
    plugin_capability::{self, service::Type as ServiceType, volume_expansion::Type as ExpansionType},
    ControllerGetCapabilitiesRequest, ControllerServiceCapability, GetPluginCapabilitiesRequest,
    NodeGetCapabilitiesRequest, NodeServiceCapability, PluginCapability,
};
use crate::domain::ports::CapabilityProber;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tonic::transport::Channel;
use tracing::{debug, instrument};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the CSI prober
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Transport settings
    pub connect: ConnectSettings,
    /// Budget shared by all three capability RPCs
    pub rpc_timeout: Duration,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            connect: ConnectSettings::default(),
            rpc_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Prober
// =============================================================================

/// Probes CSI drivers over gRPC
#[derive(Debug, Clone, Default)]
pub struct CsiProber {
    config: ProberConfig,
}

impl CsiProber {
    pub fn new(config: ProberConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CapabilityProber for CsiProber {
    #[instrument(skip(self))]
    async fn probe(&self, address: &str) -> Result<CapabilityFeatures> {
        let endpoint = DriverEndpoint::parse(address)?;
        let channel = endpoint.connect(&self.config.connect).await?;

        let features = tokio::time::timeout(self.config.rpc_timeout, query_capabilities(channel))
            .await
            .map_err(|_| Error::RpcTimeout {
                address: address.to_string(),
                timeout: self.config.rpc_timeout,
            })??;

        debug!(?features, "Probed driver");
        Ok(features)
    }
}

/// Run the three capability RPCs over one channel.
///
/// Takes the channel by value so it is released as soon as the calls finish
/// or the surrounding timeout drops this future.
async fn query_capabilities(channel: Channel) -> Result<CapabilityFeatures> {
    let mut features = CapabilityFeatures::default();

    let plugin = IdentityClient::new(channel.clone())
        .get_plugin_capabilities(GetPluginCapabilitiesRequest {})
        .await?
        .into_inner();
    fold_plugin_capabilities(&mut features, &plugin.capabilities);

    let controller = ControllerClient::new(channel.clone())
        .controller_get_capabilities(ControllerGetCapabilitiesRequest {})
        .await?
        .into_inner();
    fold_controller_capabilities(&mut features, &controller.capabilities);

    let node = NodeClient::new(channel)
        .node_get_capabilities(NodeGetCapabilitiesRequest {})
        .await?
        .into_inner();
    fold_node_capabilities(&mut features, &node.capabilities);

    Ok(features)
}

// =============================================================================
// Capability Folding
// =============================================================================

/// Topology and expansion mode from Identity/GetPluginCapabilities.
///
/// When a driver lists more than one expansion mode the last one wins.
pub fn fold_plugin_capabilities(features: &mut CapabilityFeatures, caps: &[PluginCapability]) {
    for cap in caps {
        match &cap.r#type {
            Some(plugin_capability::Type::Service(service)) => {
                if service.r#type() == ServiceType::VolumeAccessibilityConstraints {
                    features.topology = true;
                }
            }
            Some(plugin_capability::Type::VolumeExpansion(expansion)) => match expansion.r#type() {
                ExpansionType::Online => features.volume.expand = ExpandMode::Online,
                ExpansionType::Offline => features.volume.expand = ExpandMode::Offline,
                ExpansionType::Unknown => {}
            },
            None => {}
        }
    }
}

/// Volume and snapshot operations from Controller/ControllerGetCapabilities
pub fn fold_controller_capabilities(
    features: &mut CapabilityFeatures,
    caps: &[ControllerServiceCapability],
) {
    for cap in caps {
        let Some(controller_service_capability::Type::Rpc(rpc)) = &cap.r#type else {
            continue;
        };
        match rpc.r#type() {
            ControllerRpc::CreateDeleteVolume => features.volume.create = true,
            ControllerRpc::PublishUnpublishVolume => features.volume.attach = true,
            ControllerRpc::ListVolumes => features.volume.list = true,
            ControllerRpc::CloneVolume => features.volume.clone = true,
            ControllerRpc::CreateDeleteSnapshot => features.snapshot.create = true,
            ControllerRpc::ListSnapshots => features.snapshot.list = true,
            _ => {}
        }
    }
}

/// Volume stats from Node/NodeGetCapabilities
pub fn fold_node_capabilities(features: &mut CapabilityFeatures, caps: &[NodeServiceCapability]) {
    for cap in caps {
        if let Some(node_service_capability::Type::Rpc(rpc)) = &cap.r#type {
            if rpc.r#type() == NodeRpc::GetVolumeStats {
                features.volume.stats = true;
            }
        }
    }
}
