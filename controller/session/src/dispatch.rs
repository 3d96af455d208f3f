use crate::{
    lifecycle::LifecycleManager,
    metrics::SessionMetrics,
    registry::ConnectionHandle,
};
use fleetlink_aggregate::Aggregator;
use fleetlink_core::message::{Envelope, Request, RequestError};
use fleetlink_store::SharedStore;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The handlers behind a cluster stream, one set shared by every session.
pub struct Handlers {
    lifecycle: LifecycleManager,
    aggregator: Aggregator,
    store: SharedStore,
    metrics: SessionMetrics,
}

/// One cluster stream's receive loop.
///
/// Every inbound message is validated, decoded into a [`Request`] and handled
/// in its own task — fire-and-forget, so handlers for the same cluster may
/// run out of arrival order. The loop ends when the inbound channel closes;
/// there is no per-cluster teardown (the connection registry entry expires on
/// its own).
pub struct Session {
    handlers: Arc<Handlers>,
}

// === impl Handlers ===

impl Handlers {
    pub fn new(
        lifecycle: LifecycleManager,
        aggregator: Aggregator,
        store: SharedStore,
        metrics: SessionMetrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            lifecycle,
            aggregator,
            store,
            metrics,
        })
    }

    /// Decodes and handles one envelope, producing the response to send back
    /// on the same stream.
    async fn dispatch(&self, envelope: Envelope, handle: ConnectionHandle) -> Option<Envelope> {
        let cluster = envelope.cluster_name.clone();
        let request = match Request::parse(&envelope) {
            Ok(request) => request,
            // A body that fails to decode short-circuits: no handler runs on
            // a zero-valued request.
            Err(RequestError::Body(error)) => {
                tracing::warn!(%cluster, kind = %envelope.kind, %error, "Failed to decode request body");
                self.metrics.inc_failed(&envelope.kind);
                return Some(Envelope::failure(&envelope.kind, &cluster, &error));
            }
            // No handler is registered for this type; nothing to answer.
            Err(RequestError::UnknownKind(kind)) => {
                tracing::warn!(%cluster, %kind, "Ignoring unrecognized request type");
                return None;
            }
        };

        let kind = request.kind();
        let result = match request {
            Request::Register(req) => match self.lifecycle.register(&cluster, req, handle).await {
                Ok(snapshot) => {
                    // The snapshot is omitted entirely when empty.
                    let body = (!snapshot.is_empty()).then_some(snapshot);
                    Envelope::success(kind, &cluster, body.as_ref())
                }
                Err(error) => return Some(self.failure(kind, &cluster, error)),
            },
            Request::Heartbeat(req) => match self.lifecycle.heartbeat(&cluster, req, handle).await
            {
                Ok(()) => Envelope::success::<()>(kind, &cluster, None),
                Err(error) => return Some(self.failure(kind, &cluster, error)),
            },
            Request::ResourceStatus(req) => {
                for status in &req.cluster_resource_status_list {
                    if let Err(error) = self.store.update_resource_status(&cluster, status).await {
                        return Some(self.failure(kind, &cluster, error));
                    }
                }
                Envelope::success::<()>(kind, &cluster, None)
            }
            Request::Aggregate(req) => match self.aggregator.apply(&cluster, &req).await {
                Ok(()) => Envelope::success::<()>(kind, &cluster, None),
                Err(error) => return Some(self.failure(kind, &cluster, error)),
            },
        };

        match result {
            Ok(response) => Some(response),
            Err(error) => Some(self.failure(kind, &cluster, error)),
        }
    }

    fn failure(
        &self,
        kind: &str,
        cluster: &str,
        error: impl std::fmt::Display,
    ) -> Envelope {
        tracing::warn!(%cluster, kind, %error, "Request failed");
        self.metrics.inc_failed(kind);
        Envelope::failure(kind, cluster, error)
    }
}

// === impl Session ===

impl Session {
    pub fn new(handlers: Arc<Handlers>) -> Self {
        Self { handlers }
    }

    /// Reads envelopes until the inbound channel closes. Responses are queued
    /// onto `outbound`, the same stream's write half.
    pub async fn run(self, mut inbound: mpsc::Receiver<Envelope>, outbound: ConnectionHandle) {
        self.handlers.metrics.session_opened();
        while let Some(envelope) = inbound.recv().await {
            // Messages without a type or cluster name never reach a handler.
            if envelope.kind.is_empty() || envelope.cluster_name.is_empty() {
                self.handlers.metrics.inc_malformed();
                tracing::warn!("Dropping message without type or cluster name");
                continue;
            }

            self.handlers.metrics.inc_received(&envelope.kind);
            let handlers = self.handlers.clone();
            let outbound = outbound.clone();
            tokio::spawn(async move {
                if let Some(response) = handlers.dispatch(envelope, outbound.clone()).await {
                    if outbound.send(response).await.is_err() {
                        tracing::debug!("Session closed before the response was sent");
                    }
                }
            });
        }
        self.handlers.metrics.session_closed();
        tracing::info!("Cluster session ended");
    }
}
