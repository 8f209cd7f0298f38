//! In-process CSI driver serving the three capability RPCs over a Unix socket

use crate::csi::proto::{
    controller_service_capability, node_service_capability, plugin_capability,
    ControllerGetCapabilitiesRequest, ControllerGetCapabilitiesResponse,
    ControllerServiceCapability, GetPluginCapabilitiesRequest, GetPluginCapabilitiesResponse,
    NodeGetCapabilitiesRequest, NodeGetCapabilitiesResponse, NodeServiceCapability,
    PluginCapability,
};
use hyper::Body;
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tonic::body::BoxBody;
use tonic::codec::ProstCodec;
use tonic::codegen::{http, BoxFuture, Service};
use tonic::server::{Grpc, NamedService, UnaryService};
use tonic::transport::Server;
use tonic::Status;

/// What the fake driver answers; `None` leaves a service unimplemented
#[derive(Debug, Clone, Default)]
pub struct FakeDriver {
    pub plugin: Vec<PluginCapability>,
    pub controller: Option<Vec<ControllerServiceCapability>>,
    pub node: Vec<NodeServiceCapability>,
    /// Added to every RPC before it answers
    pub delay: Duration,
}

impl FakeDriver {
    /// Topology, offline expansion, create/clone/snapshot and volume stats
    pub fn example() -> Self {
        use controller_service_capability::rpc::Type as ControllerRpc;
        use node_service_capability::rpc::Type as NodeRpc;
        use plugin_capability::service::Type as ServiceType;
        use plugin_capability::volume_expansion::Type as ExpansionType;

        let service = |t: ServiceType| PluginCapability {
            r#type: Some(plugin_capability::Type::Service(plugin_capability::Service {
                r#type: t as i32,
            })),
        };
        let controller = |t: ControllerRpc| ControllerServiceCapability {
            r#type: Some(controller_service_capability::Type::Rpc(
                controller_service_capability::Rpc { r#type: t as i32 },
            )),
        };

        Self {
            plugin: vec![
                service(ServiceType::ControllerService),
                service(ServiceType::VolumeAccessibilityConstraints),
                PluginCapability {
                    r#type: Some(plugin_capability::Type::VolumeExpansion(
                        plugin_capability::VolumeExpansion {
                            r#type: ExpansionType::Offline as i32,
                        },
                    )),
                },
            ],
            controller: Some(vec![
                controller(ControllerRpc::CreateDeleteVolume),
                controller(ControllerRpc::CloneVolume),
                controller(ControllerRpc::CreateDeleteSnapshot),
            ]),
            node: vec![NodeServiceCapability {
                r#type: Some(node_service_capability::Type::Rpc(node_service_capability::Rpc {
                    r#type: NodeRpc::GetVolumeStats as i32,
                })),
            }],
            delay: Duration::ZERO,
        }
    }

    /// Listen on `path` and serve until the returned task is aborted
    pub fn serve_at(self, path: &Path) -> JoinHandle<()> {
        let listener = UnixListener::bind(path).unwrap();
        let incoming = Box::pin(futures::stream::unfold(listener, |listener| async move {
            let conn = listener.accept().await.map(|(stream, _)| stream);
            Some((conn, listener))
        }));

        let driver = Arc::new(self);
        let server = Server::builder()
            .add_service(IdentityService(driver.clone()))
            .add_service(ControllerService(driver.clone()))
            .add_service(NodeService(driver))
            .serve_with_incoming(incoming);

        tokio::spawn(async move {
            let _ = server.await;
        })
    }

    fn plugin_capabilities(
        &self,
        _: GetPluginCapabilitiesRequest,
    ) -> Result<GetPluginCapabilitiesResponse, Status> {
        Ok(GetPluginCapabilitiesResponse {
            capabilities: self.plugin.clone(),
        })
    }

    fn controller_capabilities(
        &self,
        _: ControllerGetCapabilitiesRequest,
    ) -> Result<ControllerGetCapabilitiesResponse, Status> {
        match &self.controller {
            Some(capabilities) => Ok(ControllerGetCapabilitiesResponse {
                capabilities: capabilities.clone(),
            }),
            None => Err(Status::unimplemented("controller service not provided")),
        }
    }

    fn node_capabilities(
        &self,
        _: NodeGetCapabilitiesRequest,
    ) -> Result<NodeGetCapabilitiesResponse, Status> {
        Ok(NodeGetCapabilitiesResponse {
            capabilities: self.node.clone(),
        })
    }
}

// =============================================================================
// gRPC plumbing
// =============================================================================

/// One unary method answered by a `FakeDriver` function
struct Method<F> {
    driver: Arc<FakeDriver>,
    reply: F,
}

impl<Req, Resp, F> UnaryService<Req> for Method<F>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: Fn(&FakeDriver, Req) -> Result<Resp, Status> + Clone + Send + 'static,
{
    type Response = Resp;
    type Future = BoxFuture<tonic::Response<Resp>, Status>;

    fn call(&mut self, request: tonic::Request<Req>) -> Self::Future {
        let driver = self.driver.clone();
        let reply = self.reply.clone();
        Box::pin(async move {
            tokio::time::sleep(driver.delay).await;
            reply(&driver, request.into_inner()).map(tonic::Response::new)
        })
    }
}

fn unary<Req, Resp, F>(
    driver: Arc<FakeDriver>,
    reply: F,
    req: http::Request<Body>,
) -> BoxFuture<http::Response<BoxBody>, Infallible>
where
    Req: prost::Message + Default + Send + 'static,
    Resp: prost::Message + Send + 'static,
    F: Fn(&FakeDriver, Req) -> Result<Resp, Status> + Clone + Send + 'static,
{
    Box::pin(async move {
        let mut grpc = Grpc::new(ProstCodec::<Resp, Req>::default());
        Ok(grpc.unary(Method { driver, reply }, req).await)
    })
}

fn unimplemented_method() -> BoxFuture<http::Response<BoxBody>, Infallible> {
    Box::pin(async { Ok(Status::unimplemented("unknown method").to_http()) })
}

macro_rules! csi_service {
    ($service:ident, $name:literal, $path:literal, $reply:expr) => {
        #[derive(Clone)]
        struct $service(Arc<FakeDriver>);

        impl NamedService for $service {
            const NAME: &'static str = $name;
        }

        impl Service<http::Request<Body>> for $service {
            type Response = http::Response<BoxBody>;
            type Error = Infallible;
            type Future = BoxFuture<Self::Response, Self::Error>;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, req: http::Request<Body>) -> Self::Future {
                if req.uri().path() == $path {
                    unary(self.0.clone(), $reply, req)
                } else {
                    unimplemented_method()
                }
            }
        }
    };
}

csi_service!(
    IdentityService,
    "csi.v1.Identity",
    "/csi.v1.Identity/GetPluginCapabilities",
    FakeDriver::plugin_capabilities
);
csi_service!(
    ControllerService,
    "csi.v1.Controller",
    "/csi.v1.Controller/ControllerGetCapabilities",
    FakeDriver::controller_capabilities
);
csi_service!(
    NodeService,
    "csi.v1.Node",
    "/csi.v1.Node/NodeGetCapabilities",
    FakeDriver::node_capabilities
);
