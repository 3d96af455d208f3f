use crate::watch::{ControllerContext, ResourceWatcher, WatchController};
use ahash::AHashMap as HashMap;
use anyhow::anyhow;
use fleetlink_core::{KindRef, PolicyRef, WatchPolicy};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The live kind → policies configuration.
///
/// Read on every object sync, written only when a policy is created or
/// deleted, so reads take a shared lock and clone out.
#[derive(Clone, Default)]
pub struct PolicyIndex {
    inner: Arc<RwLock<HashMap<KindRef, Vec<WatchPolicy>>>>,
}

// === impl PolicyIndex ===

impl PolicyIndex {
    pub fn policies_for(&self, kind: &KindRef) -> Vec<WatchPolicy> {
        self.inner.read().get(kind).cloned().unwrap_or_default()
    }

    /// Inserts a policy, replacing a previous version of the same identity.
    /// Returns whether this was the first policy referencing its kind.
    pub fn apply(&self, policy: WatchPolicy) -> bool {
        let mut inner = self.inner.write();
        let entries = inner.entry(policy.target.clone()).or_default();
        let first = entries.is_empty();
        match entries.iter_mut().find(|p| p.id == policy.id) {
            Some(existing) => *existing = policy,
            None => entries.push(policy),
        }
        first
    }

    /// Removes a policy. Returns whether it was the last one referencing the
    /// kind.
    pub fn delete(&self, kind: &KindRef, id: &PolicyRef) -> bool {
        let mut inner = self.inner.write();
        match inner.get_mut(kind) {
            Some(entries) => {
                entries.retain(|p| p.id != *id);
                if entries.is_empty() {
                    inner.remove(kind);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }
}

/// Owns the watch controllers driven by the policy configuration.
///
/// A kind's controller starts lazily when the first policy referencing it
/// appears and is torn down when the last one is removed — controllers for
/// unused kinds never run.
pub struct PolicyManager {
    index: PolicyIndex,
    watchers: HashMap<KindRef, Arc<dyn ResourceWatcher>>,
    ctx: ControllerContext,
    controllers: Mutex<HashMap<KindRef, WatchController>>,
}

// === impl PolicyManager ===

impl PolicyManager {
    /// `ctx.policies` is the index this manager mutates; controllers read it
    /// through the shared handle.
    pub fn new(watchers: HashMap<KindRef, Arc<dyn ResourceWatcher>>, ctx: ControllerContext) -> Self {
        Self {
            index: ctx.policies.clone(),
            watchers,
            ctx,
            controllers: Mutex::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> PolicyIndex {
        self.index.clone()
    }

    /// Adds a policy to the live configuration, starting the kind's
    /// controller when this is its first policy.
    pub async fn apply(&self, policy: WatchPolicy) -> anyhow::Result<()> {
        let kind = policy.target.clone();
        let id = policy.id.clone();
        if !self.index.apply(policy) {
            return Ok(());
        }

        let watcher = match self.watchers.get(&kind) {
            Some(watcher) => watcher.clone(),
            None => {
                self.index.delete(&kind, &id);
                return Err(anyhow!("no watcher for kind {kind}"));
            }
        };

        match WatchController::spawn(watcher, self.ctx.clone()).await {
            Ok(controller) => {
                self.controllers.lock().await.insert(kind, controller);
                Ok(())
            }
            Err(error) => {
                self.index.delete(&kind, &id);
                Err(error)
            }
        }
    }

    /// Removes a policy, tearing the kind's controller down when no policy
    /// references it anymore.
    pub async fn remove(&self, kind: &KindRef, id: &PolicyRef) {
        if self.index.delete(kind, id) {
            if let Some(controller) = self.controllers.lock().await.remove(kind) {
                controller.stop().await;
            }
        }
    }

    pub async fn is_running(&self, kind: &KindRef) -> bool {
        self.controllers.lock().await.contains_key(kind)
    }

    /// Stops every controller. Called on agent drain.
    pub async fn shutdown(&self) {
        let controllers: Vec<_> = {
            let mut held = self.controllers.lock().await;
            held.drain().collect()
        };
        for (_, controller) in controllers {
            controller.stop().await;
        }
    }
}
