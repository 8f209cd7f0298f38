//! In-memory stand-ins for the API server and CSI drivers

use crate::controller::informer::Informer;
use crate::controller::reconciler::Reconciler;
use crate::crd::{
    CapabilityFeatures, ExpandMode, SnapshotFeatures, StorageClassCapability,
    StorageClassCapabilitySpec, VolumeFeatures, VolumeSnapshotClass,
};
use crate::csi::SocketDirResolver;
use crate::domain::ports::{CapabilityProber, CapabilityStore, ObjectCache};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use async_trait::async_trait;
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::error::ErrorResponse;
use kube::runtime::watcher::Event;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn storage_class(
    name: &str,
    provisioner: &str,
    allow_expansion: bool,
    resource_version: &str,
) -> StorageClass {
    StorageClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            resource_version: Some(resource_version.to_string()),
            ..Default::default()
        },
        provisioner: provisioner.to_string(),
        allow_volume_expansion: Some(allow_expansion),
        ..Default::default()
    }
}

/// What the example driver reports before any StorageClass overrides
pub fn example_features() -> CapabilityFeatures {
    CapabilityFeatures {
        topology: false,
        volume: VolumeFeatures {
            create: true,
            clone: true,
            stats: true,
            expand: ExpandMode::Offline,
            ..Default::default()
        },
        snapshot: SnapshotFeatures {
            create: true,
            list: false,
        },
    }
}

fn api_error(code: u16, reason: &str) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: reason.into(),
        reason: reason.into(),
        code,
    }))
}

// =============================================================================
// Fake Prober
// =============================================================================

#[derive(Default)]
pub struct FakeProber {
    response: Mutex<Option<CapabilityFeatures>>,
    addresses: Mutex<Vec<String>>,
    panic: AtomicBool,
}

impl FakeProber {
    pub fn respond(&self, features: CapabilityFeatures) {
        *self.response.lock() = Some(features);
    }

    pub fn fail(&self) {
        *self.response.lock() = None;
    }

    pub fn panic_on_probe(&self, panic: bool) {
        self.panic.store(panic, Ordering::SeqCst);
    }

    pub fn addresses(&self) -> Vec<String> {
        self.addresses.lock().clone()
    }
}

#[async_trait]
impl CapabilityProber for FakeProber {
    async fn probe(&self, address: &str) -> Result<CapabilityFeatures> {
        self.addresses.lock().push(address.to_string());
        if self.panic.load(Ordering::SeqCst) {
            panic!("driver blew up");
        }
        let response = self.response.lock().clone();
        response.ok_or_else(|| Error::RpcTimeout {
            address: address.to_string(),
            timeout: Duration::from_secs(10),
        })
    }
}

// =============================================================================
// Fake Store
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Create(String),
    Update(String),
    Delete(String),
}

/// API server stand-in; successful writes are echoed into `mirror` the way
/// a watch would deliver them
pub struct FakeStore {
    objects: Mutex<BTreeMap<String, StorageClassCapability>>,
    ops: Mutex<Vec<StoreOp>>,
    fail: AtomicBool,
    mirror: Arc<Informer<StorageClassCapability>>,
}

impl FakeStore {
    pub fn new(mirror: Arc<Informer<StorageClassCapability>>) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            ops: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            mirror,
        }
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().clone()
    }

    pub fn spec(&self, name: &str) -> Option<StorageClassCapabilitySpec> {
        self.objects.lock().get(name).map(|obj| obj.spec.clone())
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(api_error(503, "ServiceUnavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl CapabilityStore for FakeStore {
    async fn create(&self, obj: &StorageClassCapability) -> Result<StorageClassCapability> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.ops.lock().push(StoreOp::Create(name.clone()));
        self.check_available()?;

        {
            let mut objects = self.objects.lock();
            if objects.contains_key(&name) {
                return Err(api_error(409, "AlreadyExists"));
            }
            objects.insert(name, obj.clone());
        }
        self.mirror.apply(Event::Applied(obj.clone()));
        Ok(obj.clone())
    }

    async fn update(&self, obj: &StorageClassCapability) -> Result<StorageClassCapability> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.ops.lock().push(StoreOp::Update(name.clone()));
        self.check_available()?;

        {
            let mut objects = self.objects.lock();
            if !objects.contains_key(&name) {
                return Err(api_error(404, "NotFound"));
            }
            objects.insert(name, obj.clone());
        }
        self.mirror.apply(Event::Applied(obj.clone()));
        Ok(obj.clone())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.ops.lock().push(StoreOp::Delete(name.to_string()));
        self.check_available()?;

        let removed = self.objects.lock().remove(name);
        // Drop the stale cache entry either way
        if let Some(cached) = self.mirror.get(name)? {
            self.mirror.apply(Event::Deleted((*cached).clone()));
        }
        match removed {
            Some(_) => Ok(()),
            None => Err(api_error(404, "NotFound")),
        }
    }

    async fn get(&self, name: &str) -> Result<StorageClassCapability> {
        self.objects
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
    }
}

// =============================================================================
// Fixture
// =============================================================================

pub struct Fixture {
    pub storage_classes: Arc<Informer<StorageClass>>,
    pub snapshot_classes: Arc<Informer<VolumeSnapshotClass>>,
    pub capabilities: Arc<Informer<StorageClassCapability>>,
    pub store: Arc<FakeStore>,
    pub prober: Arc<FakeProber>,
    pub resolver: Arc<SocketDirResolver>,
    pub reconciler: Arc<Reconciler>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_plugin_dir(Path::new("/plugins"))
    }

    pub fn with_plugin_dir(plugin_dir: &Path) -> Self {
        let storage_classes = Informer::new("StorageClass");
        let snapshot_classes = Informer::new("VolumeSnapshotClass");
        let capabilities = Informer::new("StorageClassCapability");
        let store = Arc::new(FakeStore::new(capabilities.clone()));
        let prober = Arc::new(FakeProber::default());
        let resolver = Arc::new(SocketDirResolver::new(plugin_dir, "csi.sock"));
        let metrics = Metrics::new(&prometheus::Registry::new()).expect("metrics");

        let reconciler = Arc::new(Reconciler {
            storage_classes: storage_classes.clone(),
            snapshot_classes: snapshot_classes.clone(),
            capabilities: capabilities.clone(),
            store: store.clone(),
            prober: prober.clone(),
            resolver: resolver.clone(),
            metrics,
        });

        Self {
            storage_classes,
            snapshot_classes,
            capabilities,
            store,
            prober,
            resolver,
            reconciler,
        }
    }

    pub fn add_storage_class(&self, class: StorageClass) {
        self.storage_classes.apply(Event::Applied(class));
    }

    pub fn remove_storage_class(&self, name: &str) {
        if let Some(class) = self.storage_classes.get(name).expect("cache") {
            self.storage_classes.apply(Event::Deleted((*class).clone()));
        }
    }

    pub fn add_snapshot_class(&self, name: &str, driver: &str) {
        self.snapshot_classes
            .apply(Event::Applied(VolumeSnapshotClass::new(name, driver)));
    }

    pub fn add_cached_capability(&self, name: &str, spec: StorageClassCapabilitySpec) {
        self.capabilities
            .apply(Event::Applied(StorageClassCapability::new(name, spec)));
    }

    /// Deliver an initial list to every informer, marking them synced
    pub fn sync_caches(&self) {
        relist(&self.storage_classes);
        relist(&self.snapshot_classes);
        relist(&self.capabilities);
    }
}

fn relist<K>(informer: &Arc<Informer<K>>)
where
    K: kube::Resource
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug
        + Send
        + Sync
        + 'static,
{
    let objs = informer.list().iter().map(|obj| (**obj).clone()).collect();
    informer.apply(Event::Restarted(objs));
}
