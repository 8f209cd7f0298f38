//! Driver endpoints
//!
//! Resolves provisioner names to CSI socket addresses and opens plaintext
//! gRPC channels to them, over a Unix domain socket or TCP.

use crate::domain::ports::EndpointResolver;
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::debug;

/// Default kubelet plugin registration directory
pub const DEFAULT_PLUGIN_DIR: &str = "/var/lib/kubelet/plugins";

/// Default socket file name inside a driver's plugin directory
pub const DEFAULT_SOCKET_NAME: &str = "csi.sock";

// Placeholder authority for UDS channels; the connector ignores it.
const UDS_AUTHORITY: &str = "http://[::]:50051";

/// Pause between failed connection attempts
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Connection Settings
// =============================================================================

/// Transport settings for a driver connection
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    /// Give up on connecting after this long
    pub connect_timeout: Duration,
    /// HTTP/2 keep-alive ping interval
    pub keepalive_interval: Duration,
    /// How long to wait for a keep-alive ack before the peer is declared dead
    pub keepalive_timeout: Duration,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(10),
            keepalive_timeout: Duration::from_secs(20),
        }
    }
}

// =============================================================================
// Driver Endpoint
// =============================================================================

/// Where a CSI driver listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEndpoint {
    /// Filesystem socket
    Unix(PathBuf),
    /// Network endpoint as an `http://` URI
    Network(String),
}

impl DriverEndpoint {
    /// Parse `unix:///path`, `/path`, `host:port` or `scheme://host:port`
    pub fn parse(address: &str) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::InvalidEndpoint("empty address".into()));
        }

        if let Some(path) = address.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(Error::InvalidEndpoint(address.to_string()));
            }
            return Ok(DriverEndpoint::Unix(PathBuf::from(path)));
        }

        if address.starts_with('/') {
            return Ok(DriverEndpoint::Unix(PathBuf::from(address)));
        }

        if address.contains("://") {
            Ok(DriverEndpoint::Network(address.to_string()))
        } else {
            Ok(DriverEndpoint::Network(format!("http://{}", address)))
        }
    }

    /// Open a channel to the driver.
    ///
    /// Failed attempts (socket missing, connection refused) are retried
    /// until `connect_timeout` runs out, which yields
    /// [`Error::ConnectTimeout`]. The caller owns the channel and the
    /// connection goes away when it is dropped.
    pub async fn connect(&self, settings: &ConnectSettings) -> Result<Channel> {
        let endpoint = match self {
            DriverEndpoint::Unix(_) => Endpoint::from_static(UDS_AUTHORITY),
            DriverEndpoint::Network(uri) => Endpoint::from_shared(uri.clone())
                .map_err(|e| Error::InvalidEndpoint(format!("{}: {}", uri, e)))?,
        }
        .connect_timeout(settings.connect_timeout)
        .http2_keep_alive_interval(settings.keepalive_interval)
        .keep_alive_timeout(settings.keepalive_timeout)
        .keep_alive_while_idle(true);

        let attempts = async {
            loop {
                match self.try_connect(endpoint.clone(), settings).await {
                    Ok(channel) => return channel,
                    Err(e) => {
                        debug!(error = %e, "Driver at {} not ready, retrying", self);
                        tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                    }
                }
            }
        };

        debug!("Connecting to driver at {}", self);
        tokio::time::timeout(settings.connect_timeout, attempts)
            .await
            .map_err(|_| Error::ConnectTimeout {
                address: self.to_string(),
                timeout: settings.connect_timeout,
            })
    }

    async fn try_connect(
        &self,
        endpoint: Endpoint,
        settings: &ConnectSettings,
    ) -> std::result::Result<Channel, tonic::transport::Error> {
        match self {
            DriverEndpoint::Unix(path) => {
                let path = path.clone();
                endpoint
                    .connect_with_connector(service_fn(move |_: Uri| {
                        UnixStream::connect(path.clone())
                    }))
                    .await
            }
            DriverEndpoint::Network(_) => {
                endpoint
                    .tcp_keepalive(Some(settings.keepalive_interval))
                    .connect()
                    .await
            }
        }
    }
}

impl std::fmt::Display for DriverEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverEndpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            DriverEndpoint::Network(uri) => write!(f, "{}", uri),
        }
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves `provisioner` to `unix://{plugin_dir}/{provisioner}/{socket_name}`
#[derive(Debug, Clone)]
pub struct SocketDirResolver {
    plugin_dir: PathBuf,
    socket_name: String,
}

impl SocketDirResolver {
    pub fn new(plugin_dir: impl Into<PathBuf>, socket_name: impl Into<String>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            socket_name: socket_name.into(),
        }
    }
}

impl Default for SocketDirResolver {
    fn default() -> Self {
        Self::new(DEFAULT_PLUGIN_DIR, DEFAULT_SOCKET_NAME)
    }
}

impl EndpointResolver for SocketDirResolver {
    fn resolve(&self, provisioner: &str) -> String {
        let path = self.plugin_dir.join(provisioner).join(&self.socket_name);
        format!("unix://{}", path.display())
    }

    fn exists(&self, address: &str) -> bool {
        match DriverEndpoint::parse(address) {
            Ok(DriverEndpoint::Unix(path)) => path.exists(),
            // Nothing cheap to check for remote endpoints
            Ok(DriverEndpoint::Network(_)) => true,
            Err(_) => false,
        }
    }
}
