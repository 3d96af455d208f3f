use crate::labels::Labels;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a resource kind, e.g. `apps/v1` / `Deployment`.
///
/// Watch controllers, policies and aggregated records are all keyed by kind
/// through this reference; it never names an individual object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindRef {
    pub api_version: String,
    pub kind: String,
}

impl KindRef {
    pub fn new(api_version: impl ToString, kind: impl ToString) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }
    }
}

impl fmt::Display for KindRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

/// Namespace/name key identifying one object of a kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Canonical form of an observed cluster resource.
///
/// Watch feeds convert whatever they observe into this attribute form so the
/// watch controller and matching engine stay kind-agnostic: identity, labels,
/// a terminating flag, and the raw object data for rendering.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterObject {
    pub kind: KindRef,
    pub namespace: String,
    pub name: String,
    pub labels: Labels,
    /// The object (or its namespace) is being deleted; processing it is a
    /// terminal success.
    pub terminating: bool,
    pub data: serde_json::Value,
}

impl ClusterObject {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}
