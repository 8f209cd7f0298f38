//! StorageClassCapability controller
//!
//! Wires the three change feeds to a work queue keyed by StorageClass name
//! and runs a fixed pool of workers that hand each key to the [`Reconciler`].
//!
//! ```text
//!  StorageClass ─┐
//!  SnapshotClass ┼─▶ handlers ─▶ WorkQueue ─▶ workers ─▶ Reconciler ─▶ API server
//!  Capability ───┘                  ▲                        │
//!                                   └──── add_rate_limited ◀─┘ (on error)
//! ```

use crate::controller::informer::Informer;
use crate::controller::queue::{RateLimiterConfig, WorkQueue};
use crate::controller::reconciler::Reconciler;
use crate::crd::{StorageClassCapability, VolumeSnapshotClass};
use crate::domain::ports::{
    CapabilityProber, CapabilityStore, EndpointResolver, EventHandler, ObjectCache,
};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use futures::FutureExt;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::{Api, Client};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// How often `run` re-checks cache sync during startup
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Backoff applied to failing keys
    pub rate_limiter: RateLimiterConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

// =============================================================================
// Sources
// =============================================================================

/// The three watched collections
#[derive(Clone)]
pub struct Sources {
    pub storage_classes: Arc<Informer<StorageClass>>,
    pub snapshot_classes: Arc<Informer<VolumeSnapshotClass>>,
    pub capabilities: Arc<Informer<StorageClassCapability>>,
}

impl Sources {
    pub fn new() -> Self {
        Self {
            storage_classes: Informer::new("StorageClass"),
            snapshot_classes: Informer::new("VolumeSnapshotClass"),
            capabilities: Informer::new("StorageClassCapability"),
        }
    }

    /// Start watching all three collections until `stop` fires
    pub fn watch(&self, client: Client, stop: &CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.storage_classes
                .spawn_watch(Api::all(client.clone()), stop.clone()),
            self.snapshot_classes
                .spawn_watch(Api::all(client.clone()), stop.clone()),
            self.capabilities.spawn_watch(Api::all(client), stop.clone()),
        ]
    }

    /// Whether every cache has seen its initial list
    pub fn has_synced(&self) -> bool {
        self.storage_classes.has_synced()
            && self.snapshot_classes.has_synced()
            && self.capabilities.has_synced()
    }
}

impl Default for Sources {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Event Handlers
// =============================================================================

/// Enqueues StorageClass changes
struct StorageClassHandler {
    queue: WorkQueue,
    resolver: Arc<dyn EndpointResolver>,
}

impl StorageClassHandler {
    fn enqueue_if_driver_present(&self, class: &StorageClass) {
        let Some(name) = class.metadata.name.as_deref() else {
            return;
        };
        let address = self.resolver.resolve(&class.provisioner);
        if self.resolver.exists(&address) {
            self.queue.add(name);
        } else {
            debug!(storage_class = name, %address, "Driver endpoint absent, not enqueueing");
        }
    }
}

impl EventHandler<StorageClass> for StorageClassHandler {
    fn on_add(&self, obj: &StorageClass) {
        self.enqueue_if_driver_present(obj);
    }

    fn on_update(&self, old: &StorageClass, new: &StorageClass) {
        if old.metadata.resource_version == new.metadata.resource_version {
            return;
        }
        if let Some(name) = new.metadata.name.as_deref() {
            self.queue.add(name);
        }
    }

    fn on_delete(&self, obj: &StorageClass) {
        self.enqueue_if_driver_present(obj);
    }
}

/// Enqueues the driver name of added or deleted snapshot classes
struct SnapshotClassHandler {
    queue: WorkQueue,
    resolver: Arc<dyn EndpointResolver>,
}

impl SnapshotClassHandler {
    fn enqueue_if_driver_present(&self, class: &VolumeSnapshotClass) {
        let address = self.resolver.resolve(&class.driver);
        if self.resolver.exists(&address) {
            self.queue.add(&class.driver);
        } else {
            debug!(driver = %class.driver, %address, "Driver endpoint absent, not enqueueing");
        }
    }
}

impl EventHandler<VolumeSnapshotClass> for SnapshotClassHandler {
    fn on_add(&self, obj: &VolumeSnapshotClass) {
        self.enqueue_if_driver_present(obj);
    }

    // Nothing on a snapshot class affects the derived object
    fn on_update(&self, _old: &VolumeSnapshotClass, _new: &VolumeSnapshotClass) {}

    fn on_delete(&self, obj: &VolumeSnapshotClass) {
        self.enqueue_if_driver_present(obj);
    }
}

/// Re-syncs capability objects changed or removed behind the controller's back
struct CapabilityHandler {
    queue: WorkQueue,
}

impl EventHandler<StorageClassCapability> for CapabilityHandler {
    fn on_add(&self, _obj: &StorageClassCapability) {}

    fn on_update(&self, old: &StorageClassCapability, new: &StorageClassCapability) {
        if old.spec != new.spec {
            if let Some(name) = new.metadata.name.as_deref() {
                self.queue.add(name);
            }
        }
    }

    fn on_delete(&self, obj: &StorageClassCapability) {
        if let Some(name) = obj.metadata.name.as_deref() {
            self.queue.add(name);
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Keeps one StorageClassCapability per StorageClass in sync
pub struct CapabilityController {
    config: ControllerConfig,
    sources: Sources,
    queue: WorkQueue,
    reconciler: Arc<Reconciler>,
    metrics: Metrics,
}

impl CapabilityController {
    /// Build the controller and register its handlers on `sources`
    pub fn new(
        config: ControllerConfig,
        sources: Sources,
        store: Arc<dyn CapabilityStore>,
        prober: Arc<dyn CapabilityProber>,
        resolver: Arc<dyn EndpointResolver>,
        metrics: Metrics,
    ) -> Arc<Self> {
        let queue = WorkQueue::new(config.rate_limiter.clone());

        sources.storage_classes.add_handler(Arc::new(StorageClassHandler {
            queue: queue.clone(),
            resolver: resolver.clone(),
        }));
        sources.snapshot_classes.add_handler(Arc::new(SnapshotClassHandler {
            queue: queue.clone(),
            resolver: resolver.clone(),
        }));
        sources.capabilities.add_handler(Arc::new(CapabilityHandler {
            queue: queue.clone(),
        }));

        let reconciler = Arc::new(Reconciler {
            storage_classes: sources.storage_classes.clone(),
            snapshot_classes: sources.snapshot_classes.clone(),
            capabilities: sources.capabilities.clone(),
            store,
            prober,
            resolver,
            metrics: metrics.clone(),
        });

        Arc::new(Self {
            config,
            sources,
            queue,
            reconciler,
            metrics,
        })
    }

    /// The controller's work queue
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Whether all caches have synced
    pub fn is_ready(&self) -> bool {
        self.sources.has_synced()
    }

    /// Wait for the caches, then run the workers until `stop` fires.
    ///
    /// Fails only if `stop` fires before the caches have synced.
    pub async fn run(self: Arc<Self>, stop: CancellationToken) -> Result<()> {
        info!("Waiting for caches to sync");
        while !self.sources.has_synced() {
            tokio::select! {
                _ = stop.cancelled() => return Err(Error::CacheSyncFailed),
                _ = tokio::time::sleep(SYNC_POLL_INTERVAL) => {}
            }
        }

        info!(workers = self.config.workers, "Starting workers");
        let workers: Vec<_> = (0..self.config.workers)
            .map(|id| tokio::spawn(self.clone().worker(id)))
            .collect();

        stop.cancelled().await;
        info!("Shutting down workers");
        self.queue.shutdown();
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker task failed");
            }
        }
        info!("Workers stopped");
        Ok(())
    }

    async fn worker(self: Arc<Self>, id: usize) {
        debug!(worker = id, "Worker started");
        while self.process_next_item().await {}
        debug!(worker = id, "Worker stopped");
    }

    /// Handle one key; returns `false` once the queue is shut down
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        if key.is_empty() {
            error!("Dropping malformed work queue key");
            self.metrics.reconciled("dropped");
            self.queue.forget(&key);
            self.queue.done(&key);
            return true;
        }

        trace!(key, "Processing");
        let outcome = AssertUnwindSafe(self.reconciler.sync(&key))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                self.metrics.reconciled("success");
                self.queue.forget(&key);
            }
            Ok(Err(e)) => {
                self.metrics.reconciled("error");
                self.metrics.requeues.inc();
                let delay = self.queue.add_rate_limited(&key);
                warn!(
                    key,
                    error = %e,
                    driver = e.is_driver_error(),
                    retry_in = ?delay,
                    "Sync failed, requeueing"
                );
            }
            Err(panic) => {
                self.metrics.reconciled("panic");
                self.metrics.requeues.inc();
                let delay = self.queue.add_rate_limited(&key);
                error!(
                    key,
                    panic = panic_message(panic.as_ref()),
                    retry_in = ?delay,
                    "Sync panicked, requeueing"
                );
            }
        }

        self.queue.done(&key);
        true
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
