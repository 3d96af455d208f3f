//! Aggregation merge engine.
//!
//! Folds per-cluster contributions into aggregated records: each contribution
//! lands in the record for its (policy, rule, target kind) identity inside
//! the cluster's mapped namespace, replacing in place the previous
//! contribution from the same (cluster, namespace) pair.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use fleetlink_core::{
    message::{AggregateEntry, AggregateRequest, ResourceInfo},
    record::{AggregatedRecord, Contribution},
};
use fleetlink_store::{retry_on_conflict, SharedStore, StoreError, DEFAULT_CONFLICT_RETRIES};

#[derive(Clone)]
pub struct Aggregator {
    store: SharedStore,
}

// === impl Aggregator ===

impl Aggregator {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Applies one aggregate request. All-or-nothing per request: the first
    /// contribution failure aborts processing of the remainder and is
    /// reported upstream; contributions already written stay written.
    pub async fn apply(&self, cluster: &str, req: &AggregateRequest) -> Result<(), StoreError> {
        for entry in &req.list {
            self.apply_entry(cluster, entry).await?;
        }
        Ok(())
    }

    async fn apply_entry(&self, cluster: &str, entry: &AggregateEntry) -> Result<(), StoreError> {
        for target in &entry.target_resource_data {
            let mapped = self
                .store
                .namespace_mapping(cluster, &target.namespace)
                .await?;
            self.store.ensure_namespace(&mapped).await?;

            for info in &target.resource_info_list {
                self.upsert(cluster, entry, &target.namespace, &mapped, info)
                    .await?;
                tracing::debug!(
                    cluster,
                    namespace = %mapped,
                    resource = %info.name,
                    rule = %entry.aggregate_rule,
                    "Contribution merged",
                );
            }
        }
        Ok(())
    }

    /// Find-or-create the record and fold the contribution in, retrying
    /// version conflicts with concurrent clusters.
    async fn upsert(
        &self,
        cluster: &str,
        entry: &AggregateEntry,
        parent_namespace: &str,
        namespace: &str,
        info: &ResourceInfo,
    ) -> Result<(), StoreError> {
        let store = self.store.clone();
        let policy = entry.aggregate_policy.clone();
        let rule = entry.aggregate_rule.clone();
        let kind = entry.resource_ref.clone();
        let name = AggregatedRecord::name_for(&policy, &rule, &kind);
        let namespace = namespace.to_string();
        let parent_namespace = parent_namespace.to_string();
        let contribution = Contribution {
            cluster: cluster.to_string(),
            namespace: namespace.clone(),
            name: info.name.clone(),
            data: info.resource_data.clone(),
        };

        retry_on_conflict(DEFAULT_CONFLICT_RETRIES, move || {
            let store = store.clone();
            let policy = policy.clone();
            let rule = rule.clone();
            let kind = kind.clone();
            let name = name.clone();
            let namespace = namespace.clone();
            let parent_namespace = parent_namespace.clone();
            let contribution = contribution.clone();
            async move {
                match store.get_record(&namespace, &name).await? {
                    Some(mut record) => {
                        record.upsert_contribution(contribution);
                        store.update_record(record).await?;
                    }
                    None => {
                        let mut record =
                            AggregatedRecord::new(&namespace, &policy, &rule, &kind, &parent_namespace);
                        record.upsert_contribution(contribution);
                        match store.create_record(record).await {
                            Ok(_) => {}
                            // Lost a create race: surface it as a conflict so
                            // the next attempt re-reads and updates.
                            Err(StoreError::AlreadyExists { kind, name }) => {
                                return Err(StoreError::Conflict {
                                    kind,
                                    name,
                                    expected: 0,
                                    found: 0,
                                });
                            }
                            Err(error) => return Err(error),
                        }
                    }
                }
                Ok(())
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlink_core::{
        message::{RegisterResponse, ResourceStatus, TargetResourceData},
        Cluster, KindRef,
    };
    use fleetlink_store::{MemoryStore, Result as StoreResult, Store};
    use std::sync::Arc;

    fn request(namespace: &str, resources: &[(&str, &str)]) -> AggregateRequest {
        AggregateRequest {
            list: vec![AggregateEntry {
                resource_ref: KindRef::new("v1", "Service"),
                aggregate_rule: "svc-rule".to_string(),
                aggregate_policy: "svc-policy".to_string(),
                target_resource_data: vec![TargetResourceData {
                    namespace: namespace.to_string(),
                    resource_info_list: resources
                        .iter()
                        .map(|(name, data)| ResourceInfo {
                            name: name.to_string(),
                            resource_data: data.to_string(),
                        })
                        .collect(),
                }],
            }],
        }
    }

    #[tokio::test]
    async fn contributions_replace_in_place_or_append() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = Aggregator::new(store.clone());

        aggregator
            .apply("c1", &request("prod", &[("web", "one")]))
            .await
            .unwrap();
        aggregator
            .apply("c2", &request("prod", &[("web", "two")]))
            .await
            .unwrap();

        let name = AggregatedRecord::name_for("svc-policy", "svc-rule", &KindRef::new("v1", "Service"));
        let record = store.get_record("prod", &name).await.unwrap().unwrap();
        assert_eq!(record.contributions.len(), 2);

        // A second push from c1 replaces its contribution in place.
        aggregator
            .apply("c1", &request("prod", &[("web", "three")]))
            .await
            .unwrap();
        let record = store.get_record("prod", &name).await.unwrap().unwrap();
        assert_eq!(record.contributions.len(), 2);
        let c1 = record
            .contributions
            .iter()
            .find(|c| c.cluster == "c1")
            .unwrap();
        assert_eq!(c1.data, "three");
    }

    #[tokio::test]
    async fn namespace_mapping_is_applied() {
        let store = Arc::new(MemoryStore::new());
        store.add_namespace_mapping("c1", "prod", "fleet-prod");
        let aggregator = Aggregator::new(store.clone());

        aggregator
            .apply("c1", &request("prod", &[("web", "one")]))
            .await
            .unwrap();

        assert!(store.namespace_exists("fleet-prod"));
        let name = AggregatedRecord::name_for("svc-policy", "svc-rule", &KindRef::new("v1", "Service"));
        let record = store.get_record("fleet-prod", &name).await.unwrap().unwrap();
        assert_eq!(record.contributions[0].namespace, "fleet-prod");
        assert_eq!(
            record.labels[fleetlink_core::record::LABEL_PARENT_NAMESPACE],
            "prod"
        );
    }

    /// Store wrapper that rejects one namespace, standing in for a datastore
    /// write failure mid-request.
    struct DenyNamespace {
        inner: MemoryStore,
        deny: String,
    }

    #[async_trait::async_trait]
    impl Store for DenyNamespace {
        async fn get_cluster(&self, name: &str) -> StoreResult<Option<Cluster>> {
            self.inner.get_cluster(name).await
        }
        async fn list_clusters(&self) -> StoreResult<Vec<Cluster>> {
            self.inner.list_clusters().await
        }
        async fn create_cluster(&self, cluster: Cluster) -> StoreResult<Cluster> {
            self.inner.create_cluster(cluster).await
        }
        async fn update_cluster(&self, cluster: Cluster) -> StoreResult<Cluster> {
            self.inner.update_cluster(cluster).await
        }
        async fn update_cluster_status(&self, cluster: Cluster) -> StoreResult<Cluster> {
            self.inner.update_cluster_status(cluster).await
        }
        async fn update_resource_status(
            &self,
            cluster: &str,
            status: &ResourceStatus,
        ) -> StoreResult<()> {
            self.inner.update_resource_status(cluster, status).await
        }
        async fn register_snapshot(&self, cluster: &str) -> StoreResult<RegisterResponse> {
            self.inner.register_snapshot(cluster).await
        }
        async fn ensure_namespace(&self, namespace: &str) -> StoreResult<()> {
            if namespace == self.deny {
                return Err(StoreError::Internal(anyhow::anyhow!(
                    "namespace {namespace} rejected"
                )));
            }
            self.inner.ensure_namespace(namespace).await
        }
        async fn namespace_mapping(&self, cluster: &str, namespace: &str) -> StoreResult<String> {
            self.inner.namespace_mapping(cluster, namespace).await
        }
        async fn get_record(
            &self,
            namespace: &str,
            name: &str,
        ) -> StoreResult<Option<AggregatedRecord>> {
            self.inner.get_record(namespace, name).await
        }
        async fn create_record(&self, record: AggregatedRecord) -> StoreResult<AggregatedRecord> {
            self.inner.create_record(record).await
        }
        async fn update_record(&self, record: AggregatedRecord) -> StoreResult<AggregatedRecord> {
            self.inner.update_record(record).await
        }
    }

    #[tokio::test]
    async fn first_failure_aborts_the_rest() {
        let store = Arc::new(DenyNamespace {
            inner: MemoryStore::new(),
            deny: "staging".to_string(),
        });
        let aggregator = Aggregator::new(store.clone());

        let mut req = request("prod", &[("web", "one")]);
        req.list
            .push(request("staging", &[("web", "two")]).list.remove(0));
        req.list
            .push(request("dev", &[("web", "three")]).list.remove(0));

        assert!(aggregator.apply("c1", &req).await.is_err());

        let name = AggregatedRecord::name_for("svc-policy", "svc-rule", &KindRef::new("v1", "Service"));
        // The entry before the failure was committed...
        assert!(store.get_record("prod", &name).await.unwrap().is_some());
        // ...and the one after it was never processed.
        assert!(store.get_record("dev", &name).await.unwrap().is_none());
    }
}
