use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::key::ObjectKey;

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(group = "example.example.com", version = "v1alpha1", kind = "RestCall")]
#[kube(namespaced, status = "RestCallStatus")]
#[kube(
    shortname = "rc",
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.endpoint"}"#,
    printcolumn = r#"{"name":"Last Call","type":"string","jsonPath":".status.lastCallTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RestCallSpec {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl RestCallSpec {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestCallStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_call_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl RestCallStatus {
    /// Status recorded after a completed call. `called_at` keeps sub-second
    /// precision so ordering against the call start is preserved.
    pub fn completed(called_at: DateTime<Utc>, response: impl Into<String>) -> Self {
        Self {
            last_call_time: Some(called_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            response: Some(response.into()),
        }
    }

    pub fn last_call_time(&self) -> Option<DateTime<Utc>> {
        self.last_call_time
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

impl RestCall {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(
            self.namespace().unwrap_or_else(|| "default".to_string()),
            self.name_any(),
        )
    }

    pub fn for_key(key: &ObjectKey, spec: RestCallSpec) -> Self {
        let mut call = RestCall::new(&key.name, spec);
        call.metadata.namespace = Some(key.namespace.clone());
        call
    }
}
