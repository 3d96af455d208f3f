use crate::{
    dispatch::{Handlers, Session},
    registry::ConnectionHandle,
};
use fleetlink_core::wire::{EnvelopeReader, EnvelopeWriter};
use std::sync::Arc;
use tokio::{net::TcpListener, net::TcpStream, sync::mpsc};
use tracing::{info_span, Instrument};

/// Per-connection channel depth between the stream and the session.
const CHANNEL_CAPACITY: usize = 64;

/// Accepts cluster connections and runs one session per stream, each in its
/// own task, until drained.
pub async fn serve(listener: TcpListener, handlers: Arc<Handlers>, drain: drain::Watch) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    let handlers = handlers.clone();
                    let drain = drain.clone();
                    tokio::spawn(
                        serve_connection(stream, handlers, drain)
                            .instrument(info_span!("session", %peer)),
                    );
                }
                Err(error) => tracing::warn!(%error, "Failed to accept connection"),
            },
            _ = drain.clone().signaled() => {
                tracing::info!("Transport shutting down");
                return;
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, handlers: Arc<Handlers>, drain: drain::Watch) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = EnvelopeReader::new(read_half);
    let mut writer = EnvelopeWriter::new(write_half);

    let (outbound_tx, mut outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = ConnectionHandle::new(outbound_tx);

    // Writes queued responses (and any core-initiated messages) out on the
    // stream.
    let write_task = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if let Err(error) = writer.send(&envelope).await {
                tracing::debug!(%error, "Failed to write to stream");
                return;
            }
        }
    });

    let session_task = tokio::spawn(Session::new(handlers).run(inbound_rx, handle));

    tokio::pin! {
        let shutdown = drain.signaled();
    }
    loop {
        tokio::select! {
            result = reader.next() => match result {
                Ok(Some(envelope)) => {
                    if inbound_tx.send(envelope).await.is_err() {
                        break;
                    }
                }
                // Stream closed, or the channel layer reported a
                // non-recoverable read error; either way the session ends.
                Ok(None) => break,
                Err(error) => {
                    tracing::debug!(%error, "Stream read failed");
                    break;
                }
            },
            _ = &mut shutdown => break,
        }
    }

    // Closing the inbound channel lets the session loop finish; the stale
    // connection registry entry is left to expire on its own.
    drop(inbound_tx);
    let _ = session_task.await;
    write_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lifecycle::LifecycleManager, metrics::SessionMetrics, registry::ConnectionRegistry,
    };
    use fleetlink_aggregate::Aggregator;
    use fleetlink_core::{message, Envelope};
    use fleetlink_store::MemoryStore;
    use prometheus_client::registry::Registry;
    use tokio::time::Duration;

    #[tokio::test]
    async fn serves_sessions_over_tcp() {
        let store = Arc::new(MemoryStore::new());
        let registry = ConnectionRegistry::new(Duration::from_secs(60));
        let metrics = SessionMetrics::register(&mut Registry::default());
        let handlers = Handlers::new(
            LifecycleManager::new(store.clone(), registry),
            Aggregator::new(store.clone()),
            store,
            metrics,
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (signal, watch) = drain::channel();
        let server = tokio::spawn(serve(listener, handlers, watch));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let mut reader = EnvelopeReader::new(read_half);
        let mut writer = EnvelopeWriter::new(write_half);

        writer
            .send(&Envelope::new(message::REGISTER, "c1", String::new()))
            .await
            .unwrap();
        let response = reader.next().await.unwrap().unwrap();
        assert_eq!(response.kind, "RegisterSuccess");

        signal.drain().await;
        server.await.unwrap();
    }
}
