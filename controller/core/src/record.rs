//! Aggregated multi-cluster records.

use crate::resource::KindRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LABEL_RULE: &str = "fleetlink.io/rule";
pub const LABEL_POLICY: &str = "fleetlink.io/policy";
pub const LABEL_KIND: &str = "fleetlink.io/kind";
pub const LABEL_PARENT_NAMESPACE: &str = "fleetlink.io/parent-namespace";

/// One cluster's rendered view of one target resource.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub cluster: String,
    /// Resource namespace after namespace-mapping.
    pub namespace: String,
    pub name: String,
    /// Rendered payload.
    pub data: String,
}

/// A core-side record merging one resource's per-cluster contributions,
/// keyed by (policy, rule, target kind) within its namespace.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedRecord {
    pub namespace: String,
    pub name: String,
    /// Owning rule/policy/kind/parent-namespace, for later lookup.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributions: Vec<Contribution>,
    #[serde(default)]
    pub resource_version: u64,
}

// === impl AggregatedRecord ===

impl AggregatedRecord {
    /// Derived record name for a (policy, rule, kind) identity.
    pub fn name_for(policy: &str, rule: &str, kind: &KindRef) -> String {
        format!("{}-{}-{}", policy, rule, kind.kind.to_lowercase())
    }

    pub fn new(
        namespace: impl ToString,
        policy: &str,
        rule: &str,
        kind: &KindRef,
        parent_namespace: &str,
    ) -> Self {
        let labels = [
            (LABEL_RULE.to_string(), rule.to_string()),
            (LABEL_POLICY.to_string(), policy.to_string()),
            (LABEL_KIND.to_string(), kind.kind.clone()),
            (
                LABEL_PARENT_NAMESPACE.to_string(),
                parent_namespace.to_string(),
            ),
        ]
        .into_iter()
        .collect();

        Self {
            namespace: namespace.to_string(),
            name: Self::name_for(policy, rule, kind),
            labels,
            contributions: Vec::new(),
            resource_version: 0,
        }
    }

    /// Inserts a contribution, replacing in place the existing entry with the
    /// same (cluster, namespace) identity. At most one contribution per pair.
    pub fn upsert_contribution(&mut self, contribution: Contribution) {
        match self
            .contributions
            .iter_mut()
            .find(|c| c.cluster == contribution.cluster && c.namespace == contribution.namespace)
        {
            Some(existing) => *existing = contribution,
            None => self.contributions.push(contribution),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(cluster: &str, namespace: &str, data: &str) -> Contribution {
        Contribution {
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            name: "web".to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn contribution_identity_is_cluster_and_namespace() {
        let kind = KindRef::new("v1", "Service");
        let mut record = AggregatedRecord::new("fleet-prod", "svc-policy", "svc-rule", &kind, "prod");

        record.upsert_contribution(contribution("c1", "prod", "one"));
        record.upsert_contribution(contribution("c2", "prod", "two"));
        assert_eq!(record.contributions.len(), 2);

        // Same (cluster, namespace): replaced in place, not appended.
        record.upsert_contribution(contribution("c1", "prod", "three"));
        assert_eq!(record.contributions.len(), 2);
        assert_eq!(record.contributions[0].data, "three");

        // Same cluster, different namespace: appended.
        record.upsert_contribution(contribution("c1", "staging", "four"));
        assert_eq!(record.contributions.len(), 3);
    }

    #[test]
    fn record_labels_carry_owners() {
        let kind = KindRef::new("v1", "Service");
        let record = AggregatedRecord::new("fleet-prod", "svc-policy", "svc-rule", &kind, "prod");
        assert_eq!(record.name, "svc-policy-svc-rule-service");
        assert_eq!(record.labels[LABEL_POLICY], "svc-policy");
        assert_eq!(record.labels[LABEL_PARENT_NAMESPACE], "prod");
    }
}
