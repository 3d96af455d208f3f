use crate::{Result, Store, StoreError};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use fleetlink_core::{
    message::{RegisterResponse, ResourceStatus},
    record::AggregatedRecord,
    Cluster, WatchPolicy,
};
use parking_lot::RwLock;

/// In-memory [`Store`].
///
/// Backs the binary by default and every test. Objects get a monotonically
/// increasing `resource_version` on each write; version-checked updates
/// reproduce the external datastore's optimistic concurrency.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    clusters: HashMap<String, Cluster>,
    namespaces: HashSet<String>,
    /// (cluster, cluster-local namespace) -> core-side namespace.
    mappings: HashMap<(String, String), String>,
    /// (namespace, name) -> record.
    records: HashMap<(String, String), AggregatedRecord>,
    /// cluster -> (namespace, name) -> reported status.
    resource_status: HashMap<String, HashMap<(String, String), ResourceStatus>>,
    /// Serialized configuration returned to registering agents.
    policies: Vec<String>,
    rules: Vec<String>,
    next_version: u64,
}

impl State {
    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }
}

// === impl MemoryStore ===

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a namespace mapping for a cluster.
    pub fn add_namespace_mapping(
        &self,
        cluster: impl ToString,
        from: impl ToString,
        to: impl ToString,
    ) {
        self.state
            .write()
            .mappings
            .insert((cluster.to_string(), from.to_string()), to.to_string());
    }

    /// Adds a policy to the configuration handed out on register.
    pub fn add_watch_policy(&self, policy: &WatchPolicy) -> Result<()> {
        let serialized = serde_json::to_string(policy)
            .map_err(|e| StoreError::Internal(anyhow::Error::new(e)))?;
        self.state.write().policies.push(serialized);
        Ok(())
    }

    /// Adds a serialized aggregate rule to the register configuration.
    pub fn add_aggregate_rule(&self, rule: impl ToString) {
        self.state.write().rules.push(rule.to_string());
    }

    pub fn namespace_exists(&self, namespace: &str) -> bool {
        self.state.read().namespaces.contains(namespace)
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>> {
        Ok(self.state.read().clusters.get(name).cloned())
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let mut clusters: Vec<Cluster> = self.state.read().clusters.values().cloned().collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clusters)
    }

    async fn create_cluster(&self, mut cluster: Cluster) -> Result<Cluster> {
        let mut state = self.state.write();
        if state.clusters.contains_key(&cluster.name) {
            return Err(StoreError::already_exists("Cluster", &cluster.name));
        }
        cluster.resource_version = state.bump();
        state
            .clusters
            .insert(cluster.name.clone(), cluster.clone());
        Ok(cluster)
    }

    async fn update_cluster(&self, cluster: Cluster) -> Result<Cluster> {
        let mut state = self.state.write();
        let version = state.bump();
        let stored = state
            .clusters
            .get_mut(&cluster.name)
            .ok_or_else(|| StoreError::not_found("Cluster", &cluster.name))?;
        if stored.resource_version != cluster.resource_version {
            return Err(StoreError::Conflict {
                kind: "Cluster",
                name: cluster.name,
                expected: cluster.resource_version,
                found: stored.resource_version,
            });
        }
        stored.spec = cluster.spec;
        stored.resource_version = version;
        Ok(stored.clone())
    }

    async fn update_cluster_status(&self, cluster: Cluster) -> Result<Cluster> {
        let mut state = self.state.write();
        let version = state.bump();
        let stored = state
            .clusters
            .get_mut(&cluster.name)
            .ok_or_else(|| StoreError::not_found("Cluster", &cluster.name))?;
        if stored.resource_version != cluster.resource_version {
            return Err(StoreError::Conflict {
                kind: "Cluster",
                name: cluster.name,
                expected: cluster.resource_version,
                found: stored.resource_version,
            });
        }
        stored.status = cluster.status;
        stored.resource_version = version;
        Ok(stored.clone())
    }

    async fn update_resource_status(&self, cluster: &str, status: &ResourceStatus) -> Result<()> {
        self.state
            .write()
            .resource_status
            .entry(cluster.to_string())
            .or_default()
            .insert(
                (status.namespace.clone(), status.name.clone()),
                status.clone(),
            );
        Ok(())
    }

    async fn register_snapshot(&self, cluster: &str) -> Result<RegisterResponse> {
        let state = self.state.read();
        let mut cluster_resources = Vec::new();
        if let Some(statuses) = state.resource_status.get(cluster) {
            for status in statuses.values() {
                let serialized = serde_json::to_string(status)
                    .map_err(|e| StoreError::Internal(anyhow::Error::new(e)))?;
                cluster_resources.push(serialized);
            }
            cluster_resources.sort();
        }
        Ok(RegisterResponse {
            cluster_resources,
            aggregate_policies: state.policies.clone(),
            aggregate_rules: state.rules.clone(),
        })
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        self.state.write().namespaces.insert(namespace.to_string());
        Ok(())
    }

    async fn namespace_mapping(&self, cluster: &str, namespace: &str) -> Result<String> {
        let state = self.state.read();
        Ok(state
            .mappings
            .get(&(cluster.to_string(), namespace.to_string()))
            .cloned()
            .unwrap_or_else(|| namespace.to_string()))
    }

    async fn get_record(&self, namespace: &str, name: &str) -> Result<Option<AggregatedRecord>> {
        Ok(self
            .state
            .read()
            .records
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_record(&self, mut record: AggregatedRecord) -> Result<AggregatedRecord> {
        let mut state = self.state.write();
        let key = (record.namespace.clone(), record.name.clone());
        if state.records.contains_key(&key) {
            return Err(StoreError::already_exists("AggregatedRecord", &record.name));
        }
        if !state.namespaces.contains(&record.namespace) {
            return Err(StoreError::not_found("Namespace", &record.namespace));
        }
        record.resource_version = state.bump();
        state.records.insert(key, record.clone());
        Ok(record)
    }

    async fn update_record(&self, record: AggregatedRecord) -> Result<AggregatedRecord> {
        let mut state = self.state.write();
        let version = state.bump();
        let key = (record.namespace.clone(), record.name.clone());
        let stored = state
            .records
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found("AggregatedRecord", &record.name))?;
        if stored.resource_version != record.resource_version {
            return Err(StoreError::Conflict {
                kind: "AggregatedRecord",
                name: record.name,
                expected: record.resource_version,
                found: stored.resource_version,
            });
        }
        *stored = AggregatedRecord {
            resource_version: version,
            ..record
        };
        Ok(stored.clone())
    }
}
