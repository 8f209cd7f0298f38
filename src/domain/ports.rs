//! Domain Ports - Core trait definitions for the capability controller
//!
//! These traits define the boundaries between the reconcile logic and the
//! outside world (API server, local caches, CSI drivers). The controller only
//! ever talks to these, which keeps it testable with in-memory fakes.

use crate::crd::{CapabilityFeatures, StorageClassCapability};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Driver Probing
// =============================================================================

/// Asks a CSI driver what it can do
#[async_trait]
pub trait CapabilityProber: Send + Sync {
    /// Probe the driver listening at `address`.
    ///
    /// Reports only what the driver claims; StorageClass overrides are the
    /// caller's job.
    async fn probe(&self, address: &str) -> Result<CapabilityFeatures>;
}

/// Maps a provisioner name to a driver address
pub trait EndpointResolver: Send + Sync {
    /// Address of the driver serving `provisioner`
    fn resolve(&self, provisioner: &str) -> String;

    /// Cheap, synchronous check whether the endpoint is present locally.
    /// Racy by nature, only used to avoid enqueueing unreachable drivers.
    fn exists(&self, address: &str) -> bool;
}

// =============================================================================
// Read-through Caches
// =============================================================================

/// Local, eventually consistent view of a watched collection
pub trait ObjectCache<K>: Send + Sync {
    /// Look up an object by name; `Ok(None)` when absent
    fn get(&self, name: &str) -> Result<Option<Arc<K>>>;

    /// Whether the initial list has been observed
    fn has_synced(&self) -> bool;
}

/// Callbacks invoked by a change feed
pub trait EventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, obj: &K);
}

// =============================================================================
// Object Store
// =============================================================================

/// Write access to StorageClassCapability objects.
///
/// Errors for absent objects must satisfy [`crate::Error::is_not_found`].
#[async_trait]
pub trait CapabilityStore: Send + Sync {
    async fn create(&self, obj: &StorageClassCapability) -> Result<StorageClassCapability>;

    async fn update(&self, obj: &StorageClassCapability) -> Result<StorageClassCapability>;

    async fn delete(&self, name: &str) -> Result<()>;

    async fn get(&self, name: &str) -> Result<StorageClassCapability>;
}
