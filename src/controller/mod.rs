//! Capability controller
//!
//! - `informer`: watch-fed caches with event handler fan-out
//! - `queue`: deduplicating, rate-limited work queue
//! - `reconciler`: the per-key sync procedure
//! - `store`: API server writes
//! - `capability`: wires everything together and runs the workers

pub mod capability;
pub mod informer;
pub mod queue;
pub mod reconciler;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{CapabilityController, ControllerConfig, Sources};
pub use informer::Informer;
pub use queue::{ExponentialRateLimiter, RateLimiterConfig, WorkQueue};
pub use reconciler::Reconciler;
pub use store::KubeCapabilityStore;
