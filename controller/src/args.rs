use crate::admin;
use anyhow::Result;
use clap::Parser;
use fleetlink_aggregate::Aggregator;
use fleetlink_session::{
    serve, ConnectionRegistry, Handlers, LifecycleManager, LivenessMonitor, SessionMetrics,
};
use fleetlink_store::{MemoryStore, SharedStore};
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::watch, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(name = "fleetlink-controller", about = "Multi-cluster control plane core")]
pub struct Args {
    #[clap(long, default_value = "fleetlink=info,warn", env = "FLEETLINK_LOG")]
    log_level: String,

    /// Address the cluster stream listener binds.
    #[clap(long, default_value = "0.0.0.0:8090")]
    listen_addr: SocketAddr,

    /// Address of the readiness/metrics probe server.
    #[clap(long, default_value = "0.0.0.0:9990")]
    admin_addr: SocketAddr,

    /// Seconds a connection registry entry stays live before the next
    /// register or heartbeat must re-insert it.
    #[clap(long, default_value = "60")]
    heartbeat_expire_seconds: u64,

    /// Seconds without a heartbeat before a cluster is marked offline.
    #[clap(long, default_value = "120")]
    online_expiration_seconds: u64,

    /// Seconds between liveness sweeps.
    #[clap(long, default_value = "30")]
    cluster_status_check_seconds: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            listen_addr,
            admin_addr,
            heartbeat_expire_seconds,
            online_expiration_seconds,
            cluster_status_check_seconds,
        } = self;

        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_new(&log_level)?)
            .init();

        let mut prom = <Registry>::default();
        let metrics = SessionMetrics::register(prom.sub_registry_with_prefix("session"));

        // Process-scoped state, owned here and handed into the components
        // that need it.
        let store: SharedStore = Arc::new(MemoryStore::new());
        let connections = ConnectionRegistry::new(Duration::from_secs(heartbeat_expire_seconds));
        let handlers = Handlers::new(
            LifecycleManager::new(store.clone(), connections.clone()),
            Aggregator::new(store.clone()),
            store.clone(),
            metrics,
        );

        let (drain_signal, drain_watch) = drain::channel();

        let monitor = LivenessMonitor::new(
            store,
            Duration::from_secs(online_expiration_seconds),
            Duration::from_secs(cluster_status_check_seconds),
        );
        monitor.start(drain_watch.clone());

        let (ready_tx, ready_rx) = watch::channel(false);
        tokio::spawn(admin::serve(admin_addr, ready_rx, Arc::new(prom)));

        let listener = TcpListener::bind(listen_addr).await?;
        info!(%listen_addr, "Cluster stream listener bound");
        let _ = ready_tx.send(true);
        let server = tokio::spawn(serve(listener, handlers, drain_watch.clone()));

        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
        drop(drain_watch);
        drain_signal.drain().await;
        let _ = server.await;
        Ok(())
    }
}
