use ahash::AHashMap as HashMap;
use fleetlink_core::Envelope;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{Duration, Instant},
};

/// Outbound half of a cluster's duplex stream.
#[derive(Clone, Debug)]
pub struct ConnectionHandle(mpsc::Sender<Envelope>);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ConnectionStatus {
    Ok,
}

#[derive(Clone, Debug)]
struct Entry {
    handle: ConnectionHandle,
    status: ConnectionStatus,
    expires_at: Instant,
}

/// Tracks at most one live duplex stream per cluster identity.
///
/// An insert while a live, non-expired `Ok` entry is held is a no-op — the
/// existing connection wins, so a duplicate connection cannot silently
/// replace an active one. Entries are superseded once expired, never reaped:
/// the map grows with the set of cluster names ever seen.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Entry>>>,
    expire_after: Duration,
}

// === impl ConnectionHandle ===

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self(tx)
    }

    /// Queues an envelope for the cluster's stream. Fails once the session's
    /// writer has gone away.
    pub async fn send(&self, envelope: Envelope) -> Result<(), ClosedError> {
        self.0.send(envelope).await.map_err(|_| ClosedError)
    }
}

#[derive(Debug)]
pub struct ClosedError;

impl std::fmt::Display for ClosedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "connection closed".fmt(f)
    }
}

impl std::error::Error for ClosedError {}

// === impl Entry ===

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.status == ConnectionStatus::Ok && now < self.expires_at
    }
}

// === impl ConnectionRegistry ===

impl ConnectionRegistry {
    pub fn new(expire_after: Duration) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            expire_after,
        }
    }

    /// Installs a connection for the cluster unless a live entry is already
    /// held. Returns whether the handle was installed (re-inserting the
    /// handle of the live connection refreshes nothing — the caller refreshes
    /// by winning after expiry).
    pub fn insert(&self, cluster: &str, handle: ConnectionHandle) -> bool {
        let now = Instant::now();

        // Speculative read: when the held entry is still live there is
        // nothing to write, and heartbeats take this path almost always.
        if let Some(entry) = self.connections.read().get(cluster) {
            if entry.is_live(now) {
                return false;
            }
        }

        let mut connections = self.connections.write();
        // Re-check under the write lock: another session may have won.
        if let Some(entry) = connections.get(cluster) {
            if entry.is_live(now) {
                return false;
            }
        }
        connections.insert(
            cluster.to_string(),
            Entry {
                handle,
                status: ConnectionStatus::Ok,
                expires_at: now + self.expire_after,
            },
        );
        true
    }

    /// The live connection for a cluster, if any.
    pub fn lookup(&self, cluster: &str) -> Option<ConnectionHandle> {
        let now = Instant::now();
        self.connections
            .read()
            .get(cluster)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.handle.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}
