//! Capability reconciler
//!
//! Brings the StorageClassCapability named after a StorageClass in line with
//! what the StorageClass, its snapshot class and its CSI driver say. Every
//! run re-reads the caches, so a stale queue entry is harmless.

use crate::crd::{StorageClassCapability, StorageClassCapabilitySpec, VolumeSnapshotClass};
use crate::domain::ports::{CapabilityProber, CapabilityStore, EndpointResolver, ObjectCache};
use crate::error::Result;
use crate::metrics::Metrics;
use k8s_openapi::api::storage::v1::StorageClass;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Everything a sync needs to read and write
pub struct Reconciler {
    pub storage_classes: Arc<dyn ObjectCache<StorageClass>>,
    pub snapshot_classes: Arc<dyn ObjectCache<VolumeSnapshotClass>>,
    pub capabilities: Arc<dyn ObjectCache<StorageClassCapability>>,
    pub store: Arc<dyn CapabilityStore>,
    pub prober: Arc<dyn CapabilityProber>,
    pub resolver: Arc<dyn EndpointResolver>,
    pub metrics: Metrics,
}

impl Reconciler {
    /// Reconcile the capability object for the StorageClass `name`
    #[instrument(skip(self))]
    pub async fn sync(&self, name: &str) -> Result<()> {
        let Some(storage_class) = self.storage_classes.get(name)? else {
            return self.remove_capability(name).await;
        };

        let snapshot_class_exists = self.snapshot_classes.get(name)?.is_some();
        let desired = self.desired_spec(&storage_class, snapshot_class_exists).await?;

        match self.capabilities.get(name)? {
            None => {
                let capability = StorageClassCapability::new(name, desired);
                self.store.create(&capability).await?;
                self.metrics.wrote("create");
                info!("Created StorageClassCapability");
            }
            Some(existing) if existing.spec == desired => {
                debug!("StorageClassCapability up to date");
            }
            Some(existing) => {
                let mut capability = (*existing).clone();
                capability.spec = desired;
                self.store.update(&capability).await?;
                self.metrics.wrote("update");
                info!("Updated StorageClassCapability");
            }
        }
        Ok(())
    }

    /// Probe the driver and apply the StorageClass overrides
    async fn desired_spec(
        &self,
        storage_class: &StorageClass,
        snapshot_class_exists: bool,
    ) -> Result<StorageClassCapabilitySpec> {
        let address = self.resolver.resolve(&storage_class.provisioner);

        let started = Instant::now();
        let probed = self.prober.probe(&address).await;
        self.metrics.observe_probe(started);

        let allow_expansion = storage_class.allow_volume_expansion.unwrap_or(false);
        Ok(StorageClassCapabilitySpec {
            provisioner: storage_class.provisioner.clone(),
            features: probed?.restricted(allow_expansion, snapshot_class_exists),
        })
    }

    /// The StorageClass is gone; drop its capability object if there is one
    async fn remove_capability(&self, name: &str) -> Result<()> {
        if self.capabilities.get(name)?.is_none() {
            debug!("StorageClass and StorageClassCapability both absent");
            return Ok(());
        }

        match self.store.delete(name).await {
            Ok(()) => {
                self.metrics.wrote("delete");
                info!("Deleted StorageClassCapability");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("StorageClassCapability already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
