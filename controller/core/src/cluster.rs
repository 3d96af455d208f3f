use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition type recording whether the cluster's agent is reachable and
/// reporting a healthy cluster.
pub const CONDITION_READY: &str = "Ready";

/// Lifecycle phase of a managed cluster.
///
/// `Offline` is written only by the liveness monitor; every request-path
/// transition lands on `Online`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum ClusterPhase {
    Online,
    Offline,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => "Online".fmt(f),
            Self::Offline => "Offline".fmt(f),
        }
    }
}

/// An addon installed in a managed cluster, as reported by its agent.
///
/// Two addons are the same when both the name and the properties payload are
/// equal; heartbeat merges compare whole sets this way to skip no-op writes.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Addon {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addons: Vec<Addon>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub phase: ClusterPhase,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    pub last_heartbeat_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

/// A managed cluster record.
///
/// Owned by the lifecycle manager and mutated only through the
/// register/heartbeat/expire transitions. `resource_version` is stamped by
/// the store and checked on writes (optimistic concurrency).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    pub spec: ClusterSpec,
    pub status: ClusterStatus,
    #[serde(default)]
    pub resource_version: u64,
}

// === impl Cluster ===

impl Cluster {
    /// A freshly registered cluster: online, healthy, carrying the reported
    /// addon set and a ready condition.
    pub fn registered(name: impl ToString, addons: Vec<Addon>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            spec: ClusterSpec { addons },
            status: ClusterStatus {
                phase: ClusterPhase::Online,
                healthy: true,
                conditions: vec![ready_condition(true, true, now)],
                last_heartbeat_time: now,
                last_update_time: now,
            },
            resource_version: 0,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status.phase == ClusterPhase::Online
    }
}

/// Readiness computed from reachability (the stream delivered a message) and
/// the agent's own health report.
pub fn ready_condition(reachable: bool, healthy: bool, now: DateTime<Utc>) -> Condition {
    let ready = reachable && healthy;
    Condition {
        type_: CONDITION_READY.to_string(),
        reason: if ready { "ClusterReady" } else { "ClusterNotReady" }.to_string(),
        message: format!("reachable: {reachable}, healthy: {healthy}"),
        timestamp: now,
    }
}

/// Condition stamped by the liveness monitor when a cluster's heartbeat
/// lapses.
pub fn offline_condition(now: DateTime<Utc>) -> Condition {
    Condition {
        type_: CONDITION_READY.to_string(),
        reason: "HeartbeatExpired".to_string(),
        message: "no heartbeat within the online expiration period".to_string(),
        timestamp: now,
    }
}

/// Compares addon sets by name and properties payload, ignoring order.
pub fn addons_equal(current: &[Addon], reported: &[Addon]) -> bool {
    if current.len() != reported.len() {
        return false;
    }
    reported.iter().all(|addon| {
        current
            .iter()
            .any(|c| c.name == addon.name && c.properties == addon.properties)
    })
}

/// Merges reported conditions into an existing list: a condition replaces the
/// entry with the same type, otherwise it is appended. Order of untouched
/// entries is preserved.
pub fn merge_conditions(conditions: &mut Vec<Condition>, reported: Vec<Condition>) {
    for condition in reported {
        match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => conditions.push(condition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addon(name: &str, properties: Option<serde_json::Value>) -> Addon {
        Addon {
            name: name.to_string(),
            properties,
        }
    }

    #[test]
    fn addon_sets_compare_by_name_and_payload() {
        let stored = vec![
            addon("dns", None),
            addon("ingress", Some(serde_json::json!({"replicas": 2}))),
        ];

        // Same entries, different order.
        let same = vec![
            addon("ingress", Some(serde_json::json!({"replicas": 2}))),
            addon("dns", None),
        ];
        assert!(addons_equal(&stored, &same));

        // Same names, changed payload.
        let changed = vec![
            addon("dns", None),
            addon("ingress", Some(serde_json::json!({"replicas": 3}))),
        ];
        assert!(!addons_equal(&stored, &changed));

        assert!(!addons_equal(&stored, &stored[..1]));
    }

    #[test]
    fn conditions_merge_by_type() {
        let now = Utc::now();
        let mut conditions = vec![ready_condition(true, true, now)];

        merge_conditions(
            &mut conditions,
            vec![
                Condition {
                    type_: "StorageReady".to_string(),
                    reason: "Provisioned".to_string(),
                    message: String::new(),
                    timestamp: now,
                },
                ready_condition(true, false, now),
            ],
        );

        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].reason, "ClusterNotReady");
        assert_eq!(conditions[1].type_, "StorageReady");
    }
}
