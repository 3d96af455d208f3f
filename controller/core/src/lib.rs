//! Fleetlink domain model.
//!
//! The core crate holds everything both halves of the control plane agree on:
//! the cluster record and its lifecycle phases, the wire envelope and request
//! payloads exchanged over a cluster's duplex stream, watch policies with
//! their request/ignore match rules, the canonical kind-agnostic resource
//! representation produced by agent watch feeds, and the matching engine that
//! decides whether an observed resource is in scope for a policy.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cluster;
pub mod labels;
pub mod matching;
pub mod message;
pub mod policy;
pub mod record;
pub mod resource;
pub mod wire;

pub use self::{
    cluster::{Addon, Cluster, ClusterPhase, ClusterSpec, ClusterStatus, Condition},
    labels::{Labels, Selector},
    matching::{is_in_scope, NamespaceLabels},
    message::{Envelope, Request, RequestError},
    policy::{LabelRule, MatchEntry, MatchRule, PolicyRef, RenderTemplate, WatchPolicy},
    record::{AggregatedRecord, Contribution},
    resource::{ClusterObject, KindRef, ObjectKey},
};
