use chrono::{DateTime, Utc};
use fleetlink_core::cluster::{self, Cluster, ClusterPhase};
use fleetlink_store::{SharedStore, StoreError};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::time::Duration;

/// Background sweep that expires clusters whose heartbeat lapsed.
///
/// The sole writer of the `Offline` phase. It races benignly with concurrent
/// heartbeats: a heartbeat arriving mid-sweep re-marks the cluster online on
/// its own transition, and the store's version check decides the winner.
#[derive(Clone)]
pub struct LivenessMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    store: SharedStore,
    online_expiration: Duration,
    sweep_interval: Duration,
    started: AtomicBool,
}

// === impl LivenessMonitor ===

impl LivenessMonitor {
    pub fn new(store: SharedStore, online_expiration: Duration, sweep_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                online_expiration,
                sweep_interval,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Spawns the periodic sweep. Starting an already-started monitor is a
    /// no-op; returns whether this call started it.
    pub fn start(&self, drain: drain::Watch) -> bool {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let monitor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.inner.sweep_interval);
            // The first tick completes immediately; skip it so a freshly
            // started process does not sweep before any heartbeat arrived.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => monitor.sweep().await,
                    _ = drain.clone().signaled() => {
                        tracing::debug!("Liveness monitor stopped");
                        return;
                    }
                }
            }
        });
        true
    }

    /// One pass over all clusters. Errors on a single cluster are logged and
    /// do not abort the sweep for the others.
    pub async fn sweep(&self) {
        let clusters = match self.inner.store.list_clusters().await {
            Ok(clusters) => clusters,
            Err(error) => {
                tracing::warn!(%error, "Failed to list clusters");
                return;
            }
        };

        let now = Utc::now();
        for cluster in clusters {
            if !cluster.is_online() || !self.lapsed(&cluster, now) {
                continue;
            }
            let name = cluster.name.clone();
            match self.expire(cluster, now).await {
                Ok(()) => tracing::info!(cluster = %name, "Cluster heartbeat expired"),
                // A concurrent heartbeat won the version check; the cluster
                // is alive after all.
                Err(error) if error.is_conflict() => {
                    tracing::debug!(cluster = %name, "Heartbeat raced the sweep")
                }
                Err(error) => tracing::warn!(cluster = %name, %error, "Failed to offline cluster"),
            }
        }
    }

    fn lapsed(&self, cluster: &Cluster, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(cluster.status.last_heartbeat_time)
            .to_std()
            .map(|lapsed| lapsed >= self.inner.online_expiration)
            .unwrap_or(false)
    }

    async fn expire(&self, mut target: Cluster, now: DateTime<Utc>) -> Result<(), StoreError> {
        target.status.phase = ClusterPhase::Offline;
        cluster::merge_conditions(
            &mut target.status.conditions,
            vec![cluster::offline_condition(now)],
        );
        target.status.last_update_time = now;
        self.inner.store.update_cluster_status(target).await?;
        Ok(())
    }
}
