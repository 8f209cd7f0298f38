//! Storage Capability Controller
//!
//! Keeps one `StorageClassCapability` per StorageClass describing what the
//! backing CSI driver can actually do, narrowed by the StorageClass itself
//! and by whether a matching VolumeSnapshotClass exists.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         Kubernetes API server                         │
//! └───────┬──────────────────────┬──────────────────────────▲────────────┘
//!         │ watch                │ watch                    │ create/update/delete
//! ┌───────▼────────┐  ┌──────────▼───────────┐  ┌───────────┴───────────┐
//! │  StorageClass  │  │ VolumeSnapshotClass  │  │ StorageClassCapability │
//! │    informer    │  │       informer       │  │  informer + store      │
//! └───────┬────────┘  └──────────┬───────────┘  └───────────┬───────────┘
//!         └──────────────────────┼──────────────────────────┘
//!                        ┌───────▼────────┐
//!                        │   Work queue   │  dedup + per-key backoff
//!                        └───────┬────────┘
//!                        ┌───────▼────────┐      ┌────────────────────┐
//!                        │ Worker pool    │─────▶│ CSI prober (gRPC   │
//!                        │ (Reconciler)   │      │ over unix socket)  │
//!                        └────────────────┘      └────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: informers, work queue, reconciler and worker pool
//! - [`csi`]: CSI driver connection and capability probing
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Port traits the controller is written against
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod controller;
pub mod crd;
pub mod csi;
pub mod domain;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use controller::{
    CapabilityController, ControllerConfig, Informer, KubeCapabilityStore, RateLimiterConfig,
    Reconciler, Sources, WorkQueue,
};

pub use crd::{
    CapabilityFeatures, ExpandMode, SnapshotFeatures, StorageClassCapability,
    StorageClassCapabilitySpec, VolumeFeatures, VolumeSnapshotClass,
};

pub use csi::{ConnectSettings, CsiProber, DriverEndpoint, ProberConfig, SocketDirResolver};

pub use domain::ports::{
    CapabilityProber, CapabilityStore, EndpointResolver, EventHandler, ObjectCache,
};

pub use error::{Error, Result};

pub use metrics::Metrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
