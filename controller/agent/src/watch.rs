//! Generic per-kind watch controller.
//!
//! One controller runs per resource kind with at least one referencing
//! policy. The kind's watch feed pushes object keys into the work queue; a
//! fixed worker pool resolves each key to its current object, evaluates every
//! policy for the kind, and emits an aggregate contribution for each match.

use crate::{
    policies::PolicyIndex,
    queue::WorkQueue,
    render::Render,
};
use anyhow::{anyhow, Context};
use fleetlink_core::{
    matching::{self, NamespaceLabels},
    message::{self, AggregateEntry, AggregateRequest, Envelope, ResourceInfo, TargetResourceData},
    ClusterObject, KindRef, ObjectKey,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_WORKERS: usize = 4;

/// Add/update/delete notification for one object of the watched kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    Applied(ObjectKey),
    Deleted(ObjectKey),
}

/// Kind descriptor injected into a controller: the capability set needed to
/// observe one resource kind and resolve its objects into canonical form.
#[async_trait::async_trait]
pub trait ResourceWatcher: Send + Sync + 'static {
    fn kind(&self) -> KindRef;

    /// Current objects of the kind, used to seed the queue at startup.
    async fn list(&self) -> anyhow::Result<Vec<ClusterObject>>;

    /// The event feed. The receiver closing ends the controller's feed loop.
    async fn watch(&self) -> anyhow::Result<mpsc::Receiver<WatchEvent>>;

    /// The current object for a key; `None` when it is already gone.
    async fn get(&self, key: &ObjectKey) -> anyhow::Result<Option<ClusterObject>>;
}

/// Everything a controller needs besides the watcher itself.
#[derive(Clone)]
pub struct ControllerContext {
    pub cluster_name: String,
    pub policies: PolicyIndex,
    pub namespaces: Arc<dyn NamespaceLabels + Send + Sync>,
    pub render: Arc<dyn Render>,
    /// Outbound half of the agent's stream to the core.
    pub uplink: mpsc::Sender<Envelope>,
    pub workers: usize,
}

/// A running watch controller: feed task plus worker pool.
pub struct WatchController {
    kind: KindRef,
    queue: WorkQueue<ObjectKey>,
    feed: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

// === impl WatchController ===

impl WatchController {
    /// Starts the feed and worker pool for a kind. The queue is seeded with
    /// the kind's current objects so existing state is matched, not only new
    /// events.
    pub async fn spawn(
        watcher: Arc<dyn ResourceWatcher>,
        ctx: ControllerContext,
    ) -> anyhow::Result<Self> {
        let kind = watcher.kind();
        let queue = WorkQueue::new();
        let mut events = watcher.watch().await?;

        for obj in watcher.list().await? {
            queue.add(obj.key());
        }

        let feed = {
            let queue = queue.clone();
            let kind = kind.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    let key = match event {
                        WatchEvent::Applied(key) | WatchEvent::Deleted(key) => key,
                    };
                    queue.add(key);
                }
                tracing::debug!(%kind, "Watch feed ended");
                queue.shutdown();
            })
        };

        let workers = (0..ctx.workers.max(1))
            .map(|_| {
                let queue = queue.clone();
                let watcher = watcher.clone();
                let ctx = ctx.clone();
                let kind = kind.clone();
                tokio::spawn(async move {
                    while let Some(key) = queue.next().await {
                        match sync(&*watcher, &ctx, &kind, &key).await {
                            Ok(()) => queue.forget(&key),
                            Err(error) => {
                                if queue.retry(key.clone()) {
                                    tracing::debug!(%kind, %key, %error, "Sync failed, requeued");
                                } else {
                                    tracing::error!(
                                        %kind, %key, %error,
                                        "Sync failed too many times, dropping key"
                                    );
                                }
                            }
                        }
                        queue.done(&key);
                    }
                })
            })
            .collect();

        tracing::info!(%kind, "Watch controller started");
        Ok(Self {
            kind,
            queue,
            feed,
            workers,
        })
    }

    /// Tears the controller down: the feed stops, queued keys are abandoned
    /// and the workers drain out.
    pub async fn stop(self) {
        self.feed.abort();
        self.queue.shutdown();
        for worker in self.workers {
            let _ = worker.await;
        }
        tracing::info!(kind = %self.kind, "Watch controller stopped");
    }
}

/// One processing pass for a key.
///
/// An object that is already gone, or whose namespace is terminating, is a
/// terminal success: there is nothing to aggregate for it.
async fn sync(
    watcher: &dyn ResourceWatcher,
    ctx: &ControllerContext,
    kind: &KindRef,
    key: &ObjectKey,
) -> anyhow::Result<()> {
    let obj = match watcher.get(key).await? {
        Some(obj) => obj,
        None => return Ok(()),
    };
    if obj.terminating {
        return Ok(());
    }

    let mut entries = Vec::new();
    for policy in ctx.policies.policies_for(kind) {
        if !matching::is_in_scope(&policy, &obj, &*ctx.namespaces) {
            continue;
        }

        let payload = ctx
            .render
            .render(&obj, &policy.template.expr, &policy.template.output_field)
            .with_context(|| format!("rendering {key} for policy {}", policy.id))?;
        let payload = String::from_utf8(payload)
            .map_err(|_| anyhow!("rendered payload for {key} is not UTF-8"))?;

        entries.push(AggregateEntry {
            resource_ref: obj.kind.clone(),
            aggregate_rule: policy.rule.clone(),
            aggregate_policy: policy.id.name.clone(),
            target_resource_data: vec![TargetResourceData {
                namespace: obj.namespace.clone(),
                resource_info_list: vec![ResourceInfo {
                    name: obj.name.clone(),
                    resource_data: payload,
                }],
            }],
        });
    }

    if entries.is_empty() {
        return Ok(());
    }

    let request = AggregateRequest { list: entries };
    let envelope = Envelope::request(message::AGGREGATE, &ctx.cluster_name, &request)
        .context("encoding aggregate request")?;
    ctx.uplink
        .send(envelope)
        .await
        .map_err(|_| anyhow!("uplink closed"))?;
    Ok(())
}
