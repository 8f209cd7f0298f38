//! Print the StorageClassCapability CRD as YAML
//!
//! `cargo run --bin crdgen > deploy/crd.yaml`

use kube::CustomResourceExt;
use storage_capability_controller::{Result, StorageClassCapability};

fn main() -> Result<()> {
    print!("{}", serde_yaml::to_string(&StorageClassCapability::crd())?);
    Ok(())
}
