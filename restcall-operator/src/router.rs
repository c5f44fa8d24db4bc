//! Turns store change notifications and a periodic resync into queue adds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::ControllerConfig;
use crate::error::Result;
use crate::key::ObjectKey;
use crate::queue::WorkQueue;
use crate::store::{ChangeType, ResourceStore, WatchEvent};

pub const WATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct EventRouter<S> {
    store: Arc<S>,
    queue: Arc<WorkQueue>,
    resync_period: Duration,
    ignore_status_updates: bool,
    generations: HashMap<ObjectKey, i64>,
}

impl<S: ResourceStore> EventRouter<S> {
    pub fn new(store: Arc<S>, queue: Arc<WorkQueue>, config: &ControllerConfig) -> Self {
        Self {
            store,
            queue,
            // tokio intervals reject a zero period.
            resync_period: config.resync_period.max(Duration::from_millis(1)),
            ignore_status_updates: config.ignore_status_updates,
            generations: HashMap::new(),
        }
    }

    /// Enqueues the key behind `event` unless it is an update that left
    /// `metadata.generation` unchanged and such updates are being ignored.
    /// Returns whether the key was enqueued.
    pub fn route(&mut self, event: WatchEvent) -> bool {
        match event.change {
            ChangeType::Deleted => {
                self.generations.remove(&event.key);
            }
            ChangeType::Created | ChangeType::Updated => {
                let previous = match event.generation {
                    Some(generation) => self.generations.insert(event.key.clone(), generation),
                    None => None,
                };
                if self.ignore_status_updates
                    && event.change == ChangeType::Updated
                    && previous.is_some()
                    && previous == event.generation
                {
                    tracing::trace!(key = %event.key, "skipping status-only update");
                    return false;
                }
            }
        }

        self.queue.add(event.key);
        true
    }

    /// Enqueues every key the store currently knows.
    pub async fn resync(&self) -> Result<usize> {
        let keys = self.store.list_keys().await?;
        let count = keys.len();
        for key in keys {
            self.queue.add(key);
        }
        tracing::debug!(count, "resync enqueued keys");
        Ok(count)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.generations.len()
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut resync = tokio::time::interval(self.resync_period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                return;
            }

            let mut events = self.store.watch();
            tracing::info!("Watching RestCall changes");

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Event router stopping");
                            return;
                        }
                    }
                    _ = resync.tick() => {
                        if let Err(e) = self.resync().await {
                            tracing::warn!(error = %e, "resync failed");
                        }
                    }
                    event = events.next() => match event {
                        Some(Ok(event)) => {
                            self.route(event);
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "watch stream failed, re-establishing");
                            break;
                        }
                        None => {
                            tracing::warn!("watch stream ended, re-establishing");
                            break;
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
            }
            // Changes may have been missed while the stream was down.
            resync.reset_immediately();
        }
    }
}
