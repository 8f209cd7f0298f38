//! Custom Resource Definitions
//!
//! - StorageClassCapability: the derived capability descriptor (owned)
//! - VolumeSnapshotClass: external snapshot policy object (read-only)

pub mod capability;
pub mod snapshot_class;

pub use capability::*;
pub use snapshot_class::*;
