//! Worker pool driving reconciliations off the work queue.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::{ControllerConfig, OperatorConfig};
use crate::controllers::{error_policy, reconcile, Action, Context, ContextData, Retry};
use crate::error::Result;
use crate::key::ObjectKey;
use crate::queue::{ExponentialBackoff, WorkQueue};
use crate::router::EventRouter;
use crate::store::ResourceStore;

pub struct Controller<S> {
    ctx: Context<S>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
}

impl<S: ResourceStore> Controller<S> {
    pub fn new(store: Arc<S>, config: &OperatorConfig) -> Result<Self> {
        let ctx = ContextData::new(store, config.http.clone())?;
        Ok(Self::with_context(Arc::new(ctx), config))
    }

    pub fn with_context(ctx: Context<S>, config: &OperatorConfig) -> Self {
        let queue = WorkQueue::new(ExponentialBackoff::from(&config.backoff));
        Self {
            ctx,
            queue: Arc::new(queue),
            config: config.controller.clone(),
        }
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    pub fn context(&self) -> Context<S> {
        self.ctx.clone()
    }

    /// Runs the event router and the worker pool until `shutdown` flips to
    /// true. In-flight reconciliations finish before this returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let workers = self.config.workers.max(1);
        tracing::info!(workers, "Starting RestCall controller");

        let router = EventRouter::new(self.ctx.store.clone(), self.queue.clone(), &self.config);
        let router_task = tokio::spawn(router.run(shutdown.clone()));

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let ctx = self.ctx.clone();
            let queue = self.queue.clone();
            pool.spawn(async move {
                while let Some(key) = queue.get().await {
                    process(&ctx, &queue, key).await;
                }
                tracing::debug!(worker, "worker stopped");
            });
        }

        let queue = self.queue.clone();
        tokio::spawn(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            queue.shutdown();
        });

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "worker task failed");
            }
        }
        if let Err(e) = router_task.await {
            tracing::error!(error = %e, "event router task failed");
        }
        tracing::info!("RestCall controller stopped");
    }
}

/// Reconciles one key and files the outcome back into the queue.
pub async fn process<S: ResourceStore>(ctx: &ContextData<S>, queue: &WorkQueue, key: ObjectKey) {
    let started = Instant::now();
    let outcome = reconcile(&key, ctx).await;
    tracing::debug!(
        key = %key,
        elapsed_ms = started.elapsed().as_millis() as u64,
        ok = outcome.is_ok(),
        "reconcile finished"
    );
    settle(queue, &key, outcome);
}

/// Applies a reconcile outcome to the queue and releases `key`.
pub fn settle(queue: &WorkQueue, key: &ObjectKey, outcome: Result<Action>) {
    match outcome {
        Ok(Action::Done) => queue.forget(key),
        Ok(Action::RequeueAfter(delay)) => queue.add_after(key.clone(), delay),
        Err(e) => match error_policy(key, &e, queue.backoff()) {
            Retry::Immediately => queue.add(key.clone()),
            Retry::After(delay) => queue.add_after(key.clone(), delay),
            Retry::WithBackoff => {
                let delay = queue.add_rate_limited(key.clone());
                tracing::debug!(
                    key = %key,
                    delay_ms = delay.as_millis() as u64,
                    requeues = queue.num_requeues(key),
                    "requeued with backoff"
                );
            }
        },
    }
    queue.done(key);
}
