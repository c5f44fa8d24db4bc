use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use super::{ChangeType, ResourceStore, WatchEvent};
use crate::crd::{RestCall, RestCallSpec};
use crate::error::{OperatorError, Result};
use crate::key::ObjectKey;

const WATCH_BUFFER: usize = 1024;

#[derive(Default)]
struct Objects {
    items: BTreeMap<ObjectKey, RestCall>,
    resource_version: u64,
}

impl Objects {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// In-process store with the same optimistic-concurrency rules as the API
/// server: every write bumps `resourceVersion`, spec writes bump
/// `generation`, and status writes carrying a stale version are rejected.
pub struct MemoryStore {
    objects: Mutex<Objects>,
    events: broadcast::Sender<WatchEvent>,
    available: AtomicBool,
    status_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            objects: Mutex::new(Objects::default()),
            events,
            available: AtomicBool::new(true),
            status_writes: AtomicUsize::new(0),
        }
    }

    pub fn create(&self, call: RestCall) -> Result<RestCall> {
        self.ensure_available()?;
        let key = call.key();
        let created = {
            let mut objects = self.objects.lock();
            if objects.items.contains_key(&key) {
                return Err(OperatorError::already_exists(key.to_string()));
            }
            let mut call = call;
            call.metadata.namespace = Some(key.namespace.clone());
            call.metadata.resource_version = Some(objects.next_version());
            call.metadata.generation = Some(1);
            objects.items.insert(key, call.clone());
            call
        };
        self.publish(WatchEvent::from_object(&created, ChangeType::Created));
        Ok(created)
    }

    /// Full update with optimistic concurrency. Status in `call` is ignored;
    /// the stored status is kept, matching the status subresource split.
    pub fn update(&self, call: &RestCall) -> Result<RestCall> {
        self.ensure_available()?;
        let key = call.key();
        let updated = {
            let mut objects = self.objects.lock();
            let current = objects
                .items
                .get(&key)
                .cloned()
                .ok_or_else(|| OperatorError::resource_not_found(key.to_string()))?;
            check_version(&key, &current, call)?;

            let mut next = current.clone();
            next.metadata.labels = call.metadata.labels.clone();
            next.metadata.annotations = call.metadata.annotations.clone();
            if next.spec != call.spec {
                next.spec = call.spec.clone();
                next.metadata.generation = Some(current.metadata.generation.unwrap_or(0) + 1);
            }
            next.metadata.resource_version = Some(objects.next_version());
            objects.items.insert(key, next.clone());
            next
        };
        self.publish(WatchEvent::from_object(&updated, ChangeType::Updated));
        Ok(updated)
    }

    /// Unconditional spec replacement, as an owner editing the object would do.
    /// Read and write happen under one lock, so concurrent status writes never
    /// make it conflict.
    pub fn update_spec(&self, key: &ObjectKey, spec: RestCallSpec) -> Result<RestCall> {
        self.ensure_available()?;
        let updated = {
            let mut objects = self.objects.lock();
            let mut next = objects
                .items
                .get(key)
                .cloned()
                .ok_or_else(|| OperatorError::resource_not_found(key.to_string()))?;
            if next.spec != spec {
                next.spec = spec;
                next.metadata.generation = Some(next.metadata.generation.unwrap_or(0) + 1);
            }
            next.metadata.resource_version = Some(objects.next_version());
            objects.items.insert(key.clone(), next.clone());
            next
        };
        self.publish(WatchEvent::from_object(&updated, ChangeType::Updated));
        Ok(updated)
    }

    pub fn delete(&self, key: &ObjectKey) -> Result<Option<RestCall>> {
        self.ensure_available()?;
        let removed = self.objects.lock().items.remove(key);
        if let Some(ref call) = removed {
            self.publish(WatchEvent::from_object(call, ChangeType::Deleted));
        }
        Ok(removed)
    }

    pub fn get_sync(&self, key: &ObjectKey) -> Result<Option<RestCall>> {
        self.ensure_available()?;
        Ok(self.objects.lock().items.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Simulates the store becoming unreachable: every call fails with
    /// `StoreUnavailable` until availability is restored.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OperatorError::store_unavailable("memory store is offline"))
        }
    }

    fn publish(&self, event: WatchEvent) {
        debug!(key = %event.key, change = ?event.change, "store change");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_version(key: &ObjectKey, current: &RestCall, incoming: &RestCall) -> Result<()> {
    if current.metadata.resource_version != incoming.metadata.resource_version {
        return Err(OperatorError::conflict(format!(
            "{} has resourceVersion {:?}, write carried {:?}",
            key, current.metadata.resource_version, incoming.metadata.resource_version
        )));
    }
    Ok(())
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<RestCall>> {
        self.get_sync(key)
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>> {
        self.ensure_available()?;
        Ok(self.objects.lock().items.keys().cloned().collect())
    }

    async fn update_status(&self, call: &RestCall) -> Result<RestCall> {
        self.ensure_available()?;
        let key = call.key();
        let updated = {
            let mut objects = self.objects.lock();
            let current = objects
                .items
                .get(&key)
                .cloned()
                .ok_or_else(|| OperatorError::resource_not_found(key.to_string()))?;
            check_version(&key, &current, call)?;

            let mut next = current;
            next.status = call.status.clone();
            next.metadata.resource_version = Some(objects.next_version());
            objects.items.insert(key, next.clone());
            next
        };
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.publish(WatchEvent::from_object(&updated, ChangeType::Updated));
        Ok(updated)
    }

    fn watch(&self) -> BoxStream<'static, Result<WatchEvent>> {
        BroadcastStream::new(self.events.subscribe())
            .map(|item| {
                item.map_err(|e| OperatorError::store_unavailable(format!("watch: {}", e)))
            })
            .boxed()
    }
}
