//! API server access for StorageClassCapability objects

use crate::crd::StorageClassCapability;
use crate::domain::ports::CapabilityStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};

/// [`CapabilityStore`] backed by the cluster
#[derive(Clone)]
pub struct KubeCapabilityStore {
    api: Api<StorageClassCapability>,
}

impl KubeCapabilityStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl CapabilityStore for KubeCapabilityStore {
    async fn create(&self, obj: &StorageClassCapability) -> Result<StorageClassCapability> {
        Ok(self.api.create(&PostParams::default(), obj).await?)
    }

    /// Replace the stored object; `obj` carries the resourceVersion it was read at
    async fn update(&self, obj: &StorageClassCapability) -> Result<StorageClassCapability> {
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?;
        Ok(self.api.replace(name, &PostParams::default(), obj).await?)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<StorageClassCapability> {
        Ok(self.api.get(name).await?)
    }
}
