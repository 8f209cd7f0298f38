//! Domain layer - port definitions
//!
//! The traits the controller is written against; adapters in `csi` and
//! `controller` implement them.

pub mod ports;

pub use ports::*;
