//! Change-notification feeds
//!
//! An [`Informer`] consumes a watch stream, keeps a local read-through cache
//! of the collection and tells registered [`EventHandler`]s about adds,
//! updates and deletes.

use crate::domain::ports::{EventHandler, ObjectCache};
use crate::error::Result;
use futures::{pin_mut, Stream, StreamExt};
use kube::runtime::watcher::{self, watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A change observed while applying a watch event
enum Notification<K> {
    Added(Arc<K>),
    Updated(Arc<K>, Arc<K>),
    Deleted(Arc<K>),
}

/// Local cache of one watched collection plus handler fan-out
pub struct Informer<K> {
    kind: &'static str,
    cache: RwLock<HashMap<String, Arc<K>>>,
    synced: AtomicBool,
    handlers: RwLock<Vec<Arc<dyn EventHandler<K>>>>,
}

impl<K> Informer<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    pub fn new(kind: &'static str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            cache: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
            handlers: RwLock::new(Vec::new()),
        })
    }

    /// Register a handler for subsequent events
    pub fn add_handler(&self, handler: Arc<dyn EventHandler<K>>) {
        self.handlers.write().push(handler);
    }

    /// Snapshot of every cached object
    pub fn list(&self) -> Vec<Arc<K>> {
        self.cache.read().values().cloned().collect()
    }

    /// Apply one watch event to the cache and notify handlers.
    ///
    /// A `Restarted` event is a full relist: it replaces the cache, reports
    /// vanished objects as deletes and marks the informer synced.
    pub fn apply(&self, event: Event<K>) {
        let notifications = match event {
            Event::Applied(obj) => self.apply_upsert(obj).into_iter().collect(),
            Event::Deleted(obj) => self.apply_delete(obj).into_iter().collect(),
            Event::Restarted(objs) => self.apply_relist(objs),
        };

        // Handlers run without holding the cache lock so they may read it
        let handlers = self.handlers.read().clone();
        for notification in notifications {
            for handler in &handlers {
                match &notification {
                    Notification::Added(obj) => handler.on_add(obj),
                    Notification::Updated(old, new) => handler.on_update(old, new),
                    Notification::Deleted(obj) => handler.on_delete(obj),
                }
            }
        }
    }

    fn apply_upsert(&self, obj: K) -> Option<Notification<K>> {
        let name = obj.meta().name.clone()?;
        let obj = Arc::new(obj);
        let old = self.cache.write().insert(name, obj.clone());
        Some(match old {
            Some(old) => Notification::Updated(old, obj),
            None => Notification::Added(obj),
        })
    }

    fn apply_delete(&self, obj: K) -> Option<Notification<K>> {
        let name = obj.meta().name.as_deref()?;
        let removed = self.cache.write().remove(name);
        Some(Notification::Deleted(removed.unwrap_or_else(|| Arc::new(obj))))
    }

    fn apply_relist(&self, objs: Vec<K>) -> Vec<Notification<K>> {
        let mut fresh = HashMap::with_capacity(objs.len());
        for obj in objs {
            if let Some(name) = obj.meta().name.clone() {
                fresh.insert(name, Arc::new(obj));
            }
        }

        let mut notifications = Vec::new();
        let mut cache = self.cache.write();
        for (name, obj) in &fresh {
            notifications.push(match cache.get(name) {
                Some(old) => Notification::Updated(old.clone(), obj.clone()),
                None => Notification::Added(obj.clone()),
            });
        }
        for (name, old) in cache.iter() {
            if !fresh.contains_key(name) {
                notifications.push(Notification::Deleted(old.clone()));
            }
        }
        *cache = fresh;
        drop(cache);

        if !self.synced.swap(true, Ordering::AcqRel) {
            info!(kind = self.kind, count = self.cache.read().len(), "Cache synced");
        }
        notifications
    }

    /// Feed the informer from a watch stream until the stream ends.
    ///
    /// Stream errors are logged and skipped; the stream is expected to
    /// back off and resume on its own.
    pub async fn run<S>(self: Arc<Self>, stream: S)
    where
        S: Stream<Item = std::result::Result<Event<K>, watcher::Error>>,
    {
        pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => self.apply(event),
                Err(e) => warn!(kind = self.kind, error = %e, "Watch error"),
            }
        }
        debug!(kind = self.kind, "Watch stream ended");
    }

    /// Watch `api` in the background until `stop` fires
    pub fn spawn_watch(self: &Arc<Self>, api: Api<K>, stop: CancellationToken) -> JoinHandle<()> {
        let informer = self.clone();
        tokio::spawn(async move {
            let stream = watcher(api, watcher::Config::default()).default_backoff();
            tokio::select! {
                _ = stop.cancelled() => debug!(kind = informer.kind, "Watch stopped"),
                _ = informer.clone().run(stream) => {}
            }
        })
    }
}

impl<K> ObjectCache<K> for Informer<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    fn get(&self, name: &str) -> Result<Option<Arc<K>>> {
        Ok(self.cache.read().get(name).cloned())
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}
