use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;

use crate::config::HttpClientConfig;
use crate::crd::RestCallStatus;
use crate::error::{ErrorClass, OperatorError, Result};
use crate::key::ObjectKey;
use crate::queue::ExponentialBackoff;
use crate::store::ResourceStore;

use super::call;

pub struct ContextData<S> {
    pub store: Arc<S>,
    pub http: Client,
    pub http_config: HttpClientConfig,
}

pub type Context<S> = Arc<ContextData<S>>;

impl<S: ResourceStore> ContextData<S> {
    pub fn new(store: Arc<S>, http_config: HttpClientConfig) -> Result<Self> {
        let http = call::build_client(&http_config)?;
        Ok(Self::with_client(store, http, http_config))
    }

    /// Uses a caller-built client, e.g. one pointed at a test server.
    pub fn with_client(store: Arc<S>, http: Client, http_config: HttpClientConfig) -> Self {
        Self {
            store,
            http,
            http_config,
        }
    }
}

/// What the queue should do with a key after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    RequeueAfter(Duration),
}

impl Action {
    pub fn await_change() -> Self {
        Action::Done
    }
}

/// How a failed pass is rescheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    Immediately,
    After(Duration),
    WithBackoff,
}

pub async fn reconcile<S: ResourceStore>(
    key: &ObjectKey,
    ctx: &ContextData<S>,
) -> Result<Action> {
    let restcall = match ctx.store.get(key).await {
        Ok(Some(restcall)) => restcall,
        Ok(None) | Err(OperatorError::ResourceNotFound(_)) => {
            tracing::debug!(
                namespace = %key.namespace,
                name = %key.name,
                "RestCall is gone, nothing to do"
            );
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e),
    };

    tracing::info!(
        namespace = %key.namespace,
        name = %key.name,
        endpoint = %restcall.spec.endpoint,
        "Reconciling RestCall"
    );

    let request = call::build_request(&ctx.http, &restcall.spec)?;

    let limit = ctx.http_config.timeout;
    let attempt = call::execute(&ctx.http, &ctx.http_config, request);
    let body = match tokio::time::timeout(limit, attempt).await {
        Ok(body) => body?,
        Err(_) => return Err(OperatorError::Timeout(limit)),
    };
    let called_at = Utc::now();

    tracing::info!(
        namespace = %key.namespace,
        name = %key.name,
        bytes = body.len(),
        "REST call response"
    );

    let mut updated = restcall;
    updated.status = Some(RestCallStatus::completed(called_at, body));

    match ctx.store.update_status(&updated).await {
        Ok(_) => Ok(Action::await_change()),
        Err(OperatorError::ResourceNotFound(_)) => {
            tracing::debug!(
                namespace = %key.namespace,
                name = %key.name,
                "RestCall deleted during call"
            );
            Ok(Action::await_change())
        }
        Err(e) => Err(e),
    }
}

pub fn error_policy(key: &ObjectKey, error: &OperatorError, backoff: &ExponentialBackoff) -> Retry {
    match error.class() {
        ErrorClass::Validation => {
            tracing::warn!(
                namespace = %key.namespace,
                name = %key.name,
                error = %error,
                "RestCall spec is invalid, retrying at maximum backoff"
            );
            Retry::After(backoff.max_delay())
        }
        ErrorClass::Conflict => {
            tracing::debug!(
                namespace = %key.namespace,
                name = %key.name,
                error = %error,
                "Status update conflicted, re-reading"
            );
            Retry::Immediately
        }
        ErrorClass::Transport => {
            tracing::warn!(
                namespace = %key.namespace,
                name = %key.name,
                error = %error,
                "REST call failed"
            );
            Retry::WithBackoff
        }
        ErrorClass::Rejected => {
            tracing::warn!(
                namespace = %key.namespace,
                name = %key.name,
                error = %error,
                "Resource store rejected the request"
            );
            Retry::WithBackoff
        }
        ErrorClass::StoreUnavailable => {
            tracing::error!(
                namespace = %key.namespace,
                name = %key.name,
                error = %error,
                store_unavailable = true,
                "Resource store unavailable"
            );
            Retry::WithBackoff
        }
    }
}
