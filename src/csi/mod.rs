//! CSI driver access
//!
//! - `proto`: the CSI v1 capability messages and gRPC clients
//! - `endpoint`: address resolution and channel setup
//! - `prober`: the capability prober built on both

pub mod endpoint;
pub mod prober;
#[allow(clippy::all)]
pub mod proto;

#[cfg(test)]
pub(crate) mod testing;

pub use endpoint::{ConnectSettings, DriverEndpoint, SocketDirResolver};
pub use prober::{CsiProber, ProberConfig};
