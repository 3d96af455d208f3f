//! Wire protocol between the core and cluster agents.
//!
//! One duplex stream per cluster carries newline-delimited [`Envelope`]s.
//! Inbound envelopes decode into a closed [`Request`] variant so the
//! dispatcher matches exhaustively over the known request kinds instead of a
//! runtime string table.

use crate::{
    cluster::{Addon, Condition},
    resource::KindRef,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub const REGISTER: &str = "Register";
pub const HEARTBEAT: &str = "Heartbeat";
pub const RESOURCE: &str = "Resource";
pub const AGGREGATE: &str = "Aggregate";

/// One message on a cluster's stream, either direction.
///
/// `body` is a JSON document for the kind-specific payload; responses mirror
/// the request kind with a `Success`/`Failed` suffix.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
}

// === impl Envelope ===

impl Envelope {
    pub fn new(kind: impl ToString, cluster_name: impl ToString, body: String) -> Self {
        Self {
            kind: kind.to_string(),
            cluster_name: cluster_name.to_string(),
            body,
        }
    }

    /// A request envelope with a serialized payload.
    pub fn request<T: Serialize>(
        kind: &str,
        cluster_name: &str,
        body: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(kind, cluster_name, serde_json::to_string(body)?))
    }

    /// The `<kind>Success` response, with an optional payload.
    pub fn success<T: Serialize>(
        request_kind: &str,
        cluster_name: &str,
        body: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let body = match body {
            Some(body) => serde_json::to_string(body)?,
            None => String::new(),
        };
        Ok(Self::new(
            format!("{request_kind}Success"),
            cluster_name,
            body,
        ))
    }

    /// The `<kind>Failed` response carrying a human-readable message.
    pub fn failure(request_kind: &str, cluster_name: &str, message: impl ToString) -> Self {
        let body = FailureBody {
            message: message.to_string(),
        };
        // A struct of one string serializes infallibly.
        let body = serde_json::to_string(&body).unwrap_or_default();
        Self::new(format!("{request_kind}Failed"), cluster_name, body)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureBody {
    pub message: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub addons: Vec<Addon>,
}

/// Register response: the cluster's existing configuration, each entry a
/// serialized resource. Omitted entirely when empty.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregate_policies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregate_rules: Vec<String>,
}

impl RegisterResponse {
    pub fn is_empty(&self) -> bool {
        self.cluster_resources.is_empty()
            && self.aggregate_policies.is_empty()
            && self.aggregate_rules.is_empty()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub addons: Vec<Addon>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub healthy: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub status: serde_json::Value,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatusRequest {
    #[serde(default)]
    pub cluster_resource_status_list: Vec<ResourceStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub name: String,
    /// Rendered payload, as produced by the agent's render function.
    #[serde(default)]
    pub resource_data: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResourceData {
    pub namespace: String,
    #[serde(default)]
    pub resource_info_list: Vec<ResourceInfo>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateEntry {
    pub resource_ref: KindRef,
    pub aggregate_rule: String,
    pub aggregate_policy: String,
    #[serde(default)]
    pub target_resource_data: Vec<TargetResourceData>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRequest {
    #[serde(default)]
    pub list: Vec<AggregateEntry>,
}

/// The known inbound request kinds.
#[derive(Clone, Debug)]
pub enum Request {
    Register(RegisterRequest),
    Heartbeat(HeartbeatRequest),
    ResourceStatus(ResourceStatusRequest),
    Aggregate(AggregateRequest),
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("unrecognized request type {0:?}")]
    UnknownKind(String),
    #[error("invalid request body: {0}")]
    Body(#[from] serde_json::Error),
}

// === impl Request ===

impl Request {
    /// Decodes an envelope's body by its kind. A decode failure
    /// short-circuits: no handler runs for a request that failed to decode.
    pub fn parse(envelope: &Envelope) -> Result<Self, RequestError> {
        let body = envelope.body.as_str();
        match envelope.kind.as_str() {
            REGISTER => Ok(Self::Register(decode(body)?)),
            HEARTBEAT => Ok(Self::Heartbeat(decode(body)?)),
            RESOURCE => Ok(Self::ResourceStatus(decode(body)?)),
            AGGREGATE => Ok(Self::Aggregate(decode(body)?)),
            kind => Err(RequestError::UnknownKind(kind.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register(_) => REGISTER,
            Self::Heartbeat(_) => HEARTBEAT,
            Self::ResourceStatus(_) => RESOURCE,
            Self::Aggregate(_) => AGGREGATE,
        }
    }
}

fn decode<T: Default + DeserializeOwned>(body: &str) -> Result<T, serde_json::Error> {
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(body)
}
