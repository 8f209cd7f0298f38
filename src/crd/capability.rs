//! StorageClassCapability CRD
//!
//! The derived resource this controller owns. One object per StorageClass,
//! named after it, describing what the backing CSI driver can do.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// StorageClassCapability CRD
// =============================================================================

/// StorageClassCapability publishes the feature set of the CSI driver behind
/// a StorageClass so that schedulers and UIs don't need to speak CSI.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.kubesphere.io",
    version = "v1alpha1",
    kind = "StorageClassCapability",
    plural = "storageclasscapabilities",
    shortname = "scc",
    printcolumn = r#"{"name": "Provisioner", "type": "string", "jsonPath": ".spec.provisioner"}"#,
    printcolumn = r#"{"name": "Expand", "type": "string", "jsonPath": ".spec.volume.expand"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassCapabilitySpec {
    /// Provisioner copied from the source StorageClass
    pub provisioner: String,

    /// Driver feature set
    #[serde(flatten)]
    pub features: CapabilityFeatures,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// What a CSI driver reports about itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityFeatures {
    /// Driver requires topology-aware scheduling
    #[serde(default)]
    pub topology: bool,

    #[serde(default)]
    pub volume: VolumeFeatures,

    #[serde(default)]
    pub snapshot: SnapshotFeatures,
}

/// Volume operations supported by the driver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeFeatures {
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub attach: bool,
    #[serde(default)]
    pub list: bool,
    #[serde(default)]
    pub clone: bool,
    #[serde(default)]
    pub stats: bool,
    #[serde(default)]
    pub expand: ExpandMode,
}

/// Snapshot operations supported by the driver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFeatures {
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub list: bool,
}

/// Volume expansion mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExpandMode {
    #[default]
    Unknown,
    Offline,
    Online,
}

impl std::fmt::Display for ExpandMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpandMode::Unknown => write!(f, "UNKNOWN"),
            ExpandMode::Offline => write!(f, "OFFLINE"),
            ExpandMode::Online => write!(f, "ONLINE"),
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl CapabilityFeatures {
    /// Apply the StorageClass-side overrides to what a driver reported.
    ///
    /// Expansion is only advertised when the StorageClass allows it, and
    /// snapshot support only when a VolumeSnapshotClass exists to request it.
    pub fn restricted(mut self, allow_expansion: bool, snapshot_class_exists: bool) -> Self {
        if !allow_expansion {
            self.volume.expand = ExpandMode::Unknown;
        }
        if !snapshot_class_exists {
            self.snapshot = SnapshotFeatures::default();
        }
        self
    }
}
