use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use super::{ChangeType, ResourceStore, WatchEvent};
use crate::crd::RestCall;
use crate::error::{OperatorError, Result};
use crate::key::ObjectKey;

pub const FIELD_MANAGER: &str = "restcall-operator";

/// `RestCall` objects served by a Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    namespace: Option<String>,
}

impl KubeStore {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    fn scoped(&self) -> Api<RestCall> {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn namespaced(&self, namespace: &str) -> Api<RestCall> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<RestCall>> {
        self.namespaced(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(classify_error)
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>> {
        let list = self
            .scoped()
            .list(&ListParams::default())
            .await
            .map_err(classify_error)?;
        Ok(list.items.iter().map(RestCall::key).collect())
    }

    async fn update_status(&self, call: &RestCall) -> Result<RestCall> {
        let key = call.key();
        // resourceVersion in a merge patch makes the API server reject stale writes.
        let patch = json!({
            "metadata": { "resourceVersion": call.resource_version() },
            "status": call.status,
        });
        self.namespaced(&key.namespace)
            .patch_status(
                &key.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(classify_error)
    }

    fn watch(&self) -> BoxStream<'static, Result<WatchEvent>> {
        kube::runtime::watcher(self.scoped(), watcher::Config::default())
            .default_backoff()
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) => translate_event(event).map(Ok),
                    Err(e) => Some(Err(OperatorError::store_unavailable(e.to_string()))),
                })
            })
            .boxed()
    }
}

fn translate_event(event: Event<RestCall>) -> Option<WatchEvent> {
    match event {
        Event::InitApply(call) => Some(WatchEvent::from_object(&call, ChangeType::Created)),
        Event::Apply(call) => Some(WatchEvent::from_object(&call, ChangeType::Updated)),
        Event::Delete(call) => Some(WatchEvent::from_object(&call, ChangeType::Deleted)),
        Event::Init | Event::InitDone => {
            debug!("watch relist boundary");
            None
        }
    }
}

pub fn classify_error(err: kube::Error) -> OperatorError {
    match &err {
        kube::Error::Api(resp) if resp.code == 409 => OperatorError::conflict(resp.message.clone()),
        kube::Error::Api(resp) if resp.code == 404 => {
            OperatorError::resource_not_found(resp.message.clone())
        }
        kube::Error::Api(resp) if resp.code >= 500 => {
            OperatorError::store_unavailable(resp.message.clone())
        }
        kube::Error::Api(_) => OperatorError::KubeApi(err),
        _ => OperatorError::store_unavailable(err.to_string()),
    }
}
