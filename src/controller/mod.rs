//! Import controller.
//!
//! Watches the object store and feeds import request keys to a pool of
//! workers that run the [`ImportReconciler`]. The work queue guarantees a
//! request is reconciled by at most one worker at a time; failed reconciles
//! are retried with exponential backoff.

mod queue;

pub use queue::WorkQueue;

use crate::conditions::find_condition;
use crate::config::ControllerConfig;
use crate::reconciler::{Action, ImportReconciler};
use crate::resources::{ConditionType, ObjectKey, Resource, VirtualMachineImport};
use crate::store::{ObjectStore, WatchEvent, WatchEventType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs reconciles for every import request in the store.
pub struct Controller {
    reconciler: Arc<ImportReconciler>,
    queue: Arc<WorkQueue>,
    workers: usize,
}

impl Controller {
    pub fn new(reconciler: Arc<ImportReconciler>, config: &ControllerConfig) -> Self {
        let queue = WorkQueue::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_secs(config.backoff_max_seconds),
        );
        Self {
            reconciler,
            queue: Arc::new(queue),
            workers: config.workers.max(1),
        }
    }

    /// Shared work queue, for enqueueing requests by hand.
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Start the watch task and the worker pool.
    ///
    /// Every unfinished request already in the store is queued before the
    /// workers start. Returns a handle that completes once the token is
    /// cancelled and every worker has finished its current reconcile.
    pub fn start(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let store = Arc::clone(self.reconciler.store());

            // Subscribe before listing so no change falls between the two
            let events = store.subscribe();
            let queued = enqueue_unfinished(&store, &self.queue);
            tracing::info!(
                workers = self.workers,
                queued,
                "Import controller started"
            );

            let watcher = tokio::spawn(watch(
                Arc::clone(&store),
                Arc::clone(&self.queue),
                events,
                cancel_token.clone(),
            ));

            let workers: Vec<JoinHandle<()>> = (0..self.workers)
                .map(|id| {
                    tokio::spawn(work(
                        id,
                        Arc::clone(&self.reconciler),
                        Arc::clone(&self.queue),
                    ))
                })
                .collect();

            cancel_token.cancelled().await;
            tracing::info!("Import controller shutting down");
            self.queue.shutdown();

            if let Err(e) = watcher.await {
                tracing::error!(error = %e, "Watch task panicked");
            }
            for worker in futures::future::join_all(workers).await {
                if let Err(e) = worker {
                    tracing::error!(error = %e, "Worker task panicked");
                }
            }
            tracing::info!("Import controller stopped");
        })
    }
}

/// Key of the import request a watch event should trigger, if any.
///
/// - Requests are queued when created, or when their spec changes while
///   they are not finished. Status-only writes are ignored, the reconciler
///   schedules its own follow-ups.
/// - Changes to objects a request owns queue the owning request.
pub fn request_for_event(event: &WatchEvent, store: &ObjectStore) -> Option<ObjectKey> {
    if event.key.kind == VirtualMachineImport::KIND {
        return match event.event_type {
            WatchEventType::Added => Some(event.key.clone()),
            WatchEventType::Modified if event.spec_changed => {
                let request = store
                    .get::<VirtualMachineImport>(&event.key.namespace, &event.key.name)
                    .ok()
                    .flatten()?;
                (!is_finished(&request)).then(|| event.key.clone())
            }
            _ => None,
        };
    }

    let owner = event.owner.as_ref()?;
    (owner.kind == VirtualMachineImport::KIND).then(|| {
        ObjectKey::of::<VirtualMachineImport>(&event.key.namespace, &owner.name)
    })
}

fn is_finished(request: &VirtualMachineImport) -> bool {
    find_condition(&request.status.conditions, ConditionType::Succeeded).is_some()
}

/// Queue every request without a `Succeeded` condition. Returns how many were queued.
fn enqueue_unfinished(store: &ObjectStore, queue: &WorkQueue) -> usize {
    let requests = match store.list::<VirtualMachineImport>(None) {
        Ok(requests) => requests,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list import requests");
            return 0;
        }
    };

    let mut queued = 0;
    for request in requests.iter().filter(|r| !is_finished(r)) {
        queue.add(ObjectKey::for_object(request));
        queued += 1;
    }
    queued
}

async fn watch(
    store: Arc<ObjectStore>,
    queue: Arc<WorkQueue>,
    mut events: tokio::sync::broadcast::Receiver<WatchEvent>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(key) = request_for_event(&event, &store) {
                        tracing::trace!(
                            key = %key,
                            trigger = %event.key,
                            "Queueing import request"
                        );
                        queue.add(key);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Watch fell behind, resyncing");
                    enqueue_unfinished(&store, &queue);
                }
                Err(RecvError::Closed) => break,
            }
        }
        metrics::gauge!("vmimport_queue_depth").set(queue.len() as f64);
    }
}

async fn work(id: usize, reconciler: Arc<ImportReconciler>, queue: Arc<WorkQueue>) {
    while let Some(key) = queue.get().await {
        metrics::gauge!("vmimport_queue_depth").set(queue.len() as f64);
        process(&reconciler, &queue, &key, id).await;
        queue.done(&key);
    }
    tracing::debug!(worker = id, "Worker stopped");
}

async fn process(
    reconciler: &ImportReconciler,
    queue: &Arc<WorkQueue>,
    key: &ObjectKey,
    id: usize,
) {
    match reconciler.reconcile(&key.namespace, &key.name).await {
        Ok(Action::Done) => {
            queue.forget(key);
            tracing::debug!(worker = id, key = %key, "Reconcile done");
        }
        Ok(Action::Requeue(after)) => {
            queue.forget(key);
            tracing::debug!(
                worker = id,
                key = %key,
                requeue_after_ms = after.as_millis() as u64,
                "Reconcile requeued"
            );
            queue.add_after(key.clone(), after);
        }
        Err(e) if e.is_retryable() => {
            let delay = queue.add_rate_limited(key.clone());
            tracing::warn!(
                worker = id,
                key = %key,
                error = %e,
                kind = e.kind(),
                retry_in_ms = delay.as_millis() as u64,
                "Reconcile failed, retrying"
            );
        }
        Err(e) => {
            queue.forget(key);
            tracing::warn!(
                worker = id,
                key = %key,
                error = %e,
                kind = e.kind(),
                "Reconcile failed permanently"
            );
        }
    }
}
