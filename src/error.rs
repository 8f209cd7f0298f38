//! Error types for the Storage Capability Controller
//!
//! Every failure a reconcile can hit ends up in [`Error`]. The worker loop
//! does not distinguish between kinds when retrying; the only classification
//! that changes control flow is [`Error::is_not_found`].

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the controller
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Watch stream error: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    #[error("Object is missing key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Stopped before caches synced")]
    CacheSyncFailed,

    // =========================================================================
    // CSI Driver Errors
    // =========================================================================
    #[error("Invalid driver endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection to driver at {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("Capability RPCs to driver at {address} timed out after {timeout:?}")]
    RpcTimeout { address: String, timeout: Duration },

    #[error("Driver RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Serialization / IO Errors
    // =========================================================================
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the API server answered 404 for the object in question
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Whether this error originates from talking to a CSI driver
    pub fn is_driver_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidEndpoint(_)
                | Error::ConnectTimeout { .. }
                | Error::RpcTimeout { .. }
                | Error::Rpc(_)
        )
    }
}

/// Result type alias for the controller
pub type Result<T> = std::result::Result<T, Error>;
