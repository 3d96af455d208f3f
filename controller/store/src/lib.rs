//! Datastore boundary.
//!
//! Persistence of control-plane objects lives in an external orchestration
//! datastore; this crate specifies that collaborator as the [`Store`] trait
//! and provides an in-memory realization used by tests and as the binary's
//! default backing. Writes are guarded by per-object optimistic concurrency:
//! every stored object carries a `resource_version`, version-checked updates
//! fail with [`StoreError::Conflict`], and callers retry through
//! [`retry_on_conflict`].

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod error;
mod memory;
mod retry;

pub use self::{
    error::{Result, StoreError},
    memory::MemoryStore,
    retry::{retry_on_conflict, DEFAULT_CONFLICT_RETRIES},
};

use fleetlink_core::{
    message::{RegisterResponse, ResourceStatus},
    record::AggregatedRecord,
    Cluster,
};
use std::sync::Arc;

/// Datastore calls consumed by the core.
///
/// Cluster spec and status update independently (status is a subresource);
/// both are version-checked against the object's `resource_version`.
#[async_trait::async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>>;

    async fn list_clusters(&self) -> Result<Vec<Cluster>>;

    /// Fails with [`StoreError::AlreadyExists`] when the name is taken.
    async fn create_cluster(&self, cluster: Cluster) -> Result<Cluster>;

    /// Version-checked spec update; the stored status is untouched.
    async fn update_cluster(&self, cluster: Cluster) -> Result<Cluster>;

    /// Version-checked status update; the stored spec is untouched.
    async fn update_cluster_status(&self, cluster: Cluster) -> Result<Cluster>;

    /// Records one cluster resource's reported status.
    async fn update_resource_status(&self, cluster: &str, status: &ResourceStatus) -> Result<()>;

    /// The cluster's existing configuration, returned to a registering agent.
    async fn register_snapshot(&self, cluster: &str) -> Result<RegisterResponse>;

    /// Creates the namespace if it does not exist.
    async fn ensure_namespace(&self, namespace: &str) -> Result<()>;

    /// Maps a cluster-local namespace to its core-side namespace. Clusters
    /// without a mapping keep the raw namespace.
    async fn namespace_mapping(&self, cluster: &str, namespace: &str) -> Result<String>;

    async fn get_record(&self, namespace: &str, name: &str) -> Result<Option<AggregatedRecord>>;

    async fn create_record(&self, record: AggregatedRecord) -> Result<AggregatedRecord>;

    /// Version-checked record update.
    async fn update_record(&self, record: AggregatedRecord) -> Result<AggregatedRecord>;
}

/// Shared handle to the process's store.
pub type SharedStore = Arc<dyn Store>;
