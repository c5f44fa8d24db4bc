//! Access to the `RestCall` objects the controller reconciles.

pub mod k8s;
pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::crd::RestCall;
use crate::error::Result;
use crate::key::ObjectKey;

pub use k8s::KubeStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: ObjectKey,
    pub change: ChangeType,
    /// `metadata.generation` of the object; bumped on spec changes only.
    pub generation: Option<i64>,
}

impl WatchEvent {
    pub fn new(key: ObjectKey, change: ChangeType, generation: Option<i64>) -> Self {
        Self {
            key,
            change,
            generation,
        }
    }

    pub fn from_object(call: &RestCall, change: ChangeType) -> Self {
        Self::new(call.key(), change, call.metadata.generation)
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    /// `Ok(None)` when the object does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<RestCall>>;

    async fn list_keys(&self) -> Result<Vec<ObjectKey>>;

    /// Writes `call.status` only. Must fail with `OperatorError::Conflict`
    /// when `call.metadata.resource_version` is stale.
    async fn update_status(&self, call: &RestCall) -> Result<RestCall>;

    fn watch(&self) -> BoxStream<'static, Result<WatchEvent>>;
}
