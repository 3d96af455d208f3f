use crate::registry::{ConnectionHandle, ConnectionRegistry};
use chrono::{DateTime, Utc};
use fleetlink_core::{
    cluster::{self, Cluster, ClusterPhase, Condition},
    message::{HeartbeatRequest, RegisterRequest, RegisterResponse},
};
use fleetlink_store::{retry_on_conflict, SharedStore, StoreError, DEFAULT_CONFLICT_RETRIES};

/// Runs the register/heartbeat transitions of the cluster state machine.
///
/// `Unregistered → Online → Offline → Online …`; only the liveness monitor
/// writes `Offline`. Transitions for the same cluster are not mutually
/// excluded here — conflicting status writes fail on the store's version
/// check and are retried read-modify-write.
#[derive(Clone)]
pub struct LifecycleManager {
    store: SharedStore,
    registry: ConnectionRegistry,
}

// === impl LifecycleManager ===

impl LifecycleManager {
    pub fn new(store: SharedStore, registry: ConnectionRegistry) -> Self {
        Self { store, registry }
    }

    /// First-contact transition. Creates the cluster record when absent;
    /// re-registering an online cluster is an idempotent success; a known
    /// offline cluster has its spec updated and comes back online. Every
    /// successful register (re)inserts the connection with a fresh expiry and
    /// returns the cluster's existing configuration.
    pub async fn register(
        &self,
        cluster_name: &str,
        req: RegisterRequest,
        handle: ConnectionHandle,
    ) -> Result<RegisterResponse, StoreError> {
        let now = Utc::now();
        match self.store.get_cluster(cluster_name).await? {
            None => {
                let cluster = Cluster::registered(cluster_name, req.addons, now);
                match self.store.create_cluster(cluster).await {
                    Ok(_) => tracing::info!(cluster = %cluster_name, "Cluster registered"),
                    // Lost a create race: the winning register succeeded.
                    Err(StoreError::AlreadyExists { .. }) => {}
                    Err(error) => return Err(error),
                }
            }
            Some(existing) if existing.is_online() => {
                tracing::debug!(cluster = %cluster_name, "Cluster already online");
            }
            Some(existing) => {
                let mut update = existing;
                update.spec.addons = req.addons;
                self.store.update_cluster(update).await?;
                self.mark_online(cluster_name, Vec::new(), true, now).await?;
                tracing::info!(cluster = %cluster_name, "Cluster re-registered");
            }
        }

        self.registry.insert(cluster_name, handle);
        self.store.register_snapshot(cluster_name).await
    }

    /// Heartbeat transition: merges addons only when they changed, merges
    /// reported conditions, refreshes the heartbeat/update timestamps and
    /// marks the cluster online. A heartbeat for an unknown cluster fails;
    /// the agent recovers by re-registering.
    pub async fn heartbeat(
        &self,
        cluster_name: &str,
        req: HeartbeatRequest,
        handle: ConnectionHandle,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let cluster = self
            .store
            .get_cluster(cluster_name)
            .await?
            .ok_or_else(|| StoreError::not_found("Cluster", cluster_name))?;

        if !cluster::addons_equal(&cluster.spec.addons, &req.addons) {
            let mut update = cluster.clone();
            update.spec.addons = req.addons;
            self.store.update_cluster(update).await?;
            tracing::debug!(cluster = %cluster_name, "Cluster addons updated");
        }

        self.mark_online(cluster_name, req.conditions, req.healthy, now)
            .await?;

        self.registry.insert(cluster_name, handle);
        Ok(())
    }

    /// Read-modify-write status transition to `Online`, retried on version
    /// conflicts. A readiness condition is appended only when the cluster was
    /// not already online.
    async fn mark_online(
        &self,
        cluster_name: &str,
        reported: Vec<Condition>,
        healthy: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let store = self.store.clone();
        let name = cluster_name.to_string();
        retry_on_conflict(DEFAULT_CONFLICT_RETRIES, move || {
            let store = store.clone();
            let name = name.clone();
            let reported = reported.clone();
            async move {
                let mut cluster = store
                    .get_cluster(&name)
                    .await?
                    .ok_or_else(|| StoreError::not_found("Cluster", &name))?;

                let was_online = cluster.is_online();
                cluster::merge_conditions(&mut cluster.status.conditions, reported);
                if !was_online {
                    cluster::merge_conditions(
                        &mut cluster.status.conditions,
                        vec![cluster::ready_condition(true, healthy, now)],
                    );
                }
                cluster.status.healthy = healthy;
                cluster.status.phase = ClusterPhase::Online;
                cluster.status.last_heartbeat_time = now;
                cluster.status.last_update_time = now;
                store.update_cluster_status(cluster).await?;
                Ok(())
            }
        })
        .await
    }
}
