//! VolumeSnapshotClass (snapshot.storage.k8s.io/v1)
//!
//! Owned by the external-snapshotter project and only read here. Its fields
//! sit at the top level of the object instead of under `spec`, so the
//! `kube::Resource` impl is written out by hand rather than derived.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ClusterResourceScope;
use kube::Resource;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// A named policy for taking snapshots with a given CSI driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotClass {
    pub metadata: ObjectMeta,

    /// CSI driver that handles snapshots of this class
    pub driver: String,

    /// Delete or Retain
    #[serde(default)]
    pub deletion_policy: Option<String>,

    #[serde(default)]
    pub parameters: Option<BTreeMap<String, String>>,
}

impl Resource for VolumeSnapshotClass {
    type DynamicType = ();
    type Scope = ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "VolumeSnapshotClass".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        "snapshot.storage.k8s.io".into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        "v1".into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "volumesnapshotclasses".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl VolumeSnapshotClass {
    /// Build a snapshot class for the given driver
    pub fn new(name: &str, driver: &str) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            driver: driver.to_string(),
            deletion_policy: Some("Delete".to_string()),
            parameters: None,
        }
    }
}
