//! End-to-end session flow over a loopback TCP stream: register, heartbeat,
//! then heartbeat expiry.

use fleetlink_aggregate::Aggregator;
use fleetlink_core::{
    message::{self, Envelope, RegisterResponse},
    wire::{EnvelopeReader, EnvelopeWriter},
    ClusterPhase,
};
use fleetlink_session::{
    serve, ConnectionRegistry, Handlers, LifecycleManager, LivenessMonitor, SessionMetrics,
};
use fleetlink_store::{MemoryStore, Store};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{
    net::{TcpListener, TcpStream},
    time::Duration,
};

struct Core {
    store: Arc<MemoryStore>,
    connections: ConnectionRegistry,
    monitor: LivenessMonitor,
    addr: std::net::SocketAddr,
    _signal: drain::Signal,
}

async fn spawn_core(online_expiration: Duration) -> Core {
    let store = Arc::new(MemoryStore::new());
    let connections = ConnectionRegistry::new(Duration::from_secs(60));
    let metrics = SessionMetrics::register(&mut Registry::default());
    let handlers = Handlers::new(
        LifecycleManager::new(store.clone(), connections.clone()),
        Aggregator::new(store.clone()),
        store.clone(),
        metrics,
    );
    let monitor = LivenessMonitor::new(store.clone(), online_expiration, Duration::from_secs(3600));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (signal, watch) = drain::channel();
    tokio::spawn(serve(listener, handlers, watch));

    Core {
        store,
        connections,
        monitor,
        addr,
        _signal: signal,
    }
}

#[tokio::test]
async fn register_heartbeat_then_expire() {
    let core = spawn_core(Duration::from_secs(60)).await;
    core.store.add_aggregate_rule(r#"{"name":"svc-rule"}"#);

    let stream = TcpStream::connect(core.addr).await.unwrap();
    let (read_half, write_half) = stream.into_split();
    let mut reader = EnvelopeReader::new(read_half);
    let mut writer = EnvelopeWriter::new(write_half);

    // Register creates the cluster online and returns its configuration.
    writer
        .send(&Envelope::new(
            message::REGISTER,
            "c1",
            r#"{"addons":[{"name":"dns"}]}"#.to_string(),
        ))
        .await
        .unwrap();
    let response = reader.next().await.unwrap().unwrap();
    assert_eq!(response.kind, "RegisterSuccess");
    let body: RegisterResponse = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body.aggregate_rules.len(), 1);

    let cluster = core.store.get_cluster("c1").await.unwrap().unwrap();
    assert_eq!(cluster.status.phase, ClusterPhase::Online);
    assert_eq!(cluster.spec.addons[0].name, "dns");
    assert!(core.connections.lookup("c1").is_some());

    // Heartbeat refreshes the record.
    writer
        .send(&Envelope::new(
            message::HEARTBEAT,
            "c1",
            r#"{"addons":[{"name":"dns"}],"healthy":true}"#.to_string(),
        ))
        .await
        .unwrap();
    let response = reader.next().await.unwrap().unwrap();
    assert_eq!(response.kind, "HeartbeatSuccess");

    let refreshed = core.store.get_cluster("c1").await.unwrap().unwrap();
    assert!(refreshed.status.healthy);
    assert!(refreshed.status.last_heartbeat_time >= cluster.status.last_heartbeat_time);
    assert!(core.connections.lookup("c1").is_some());

    // With the heartbeat lapsed beyond the expiration window, the next sweep
    // offlines the cluster.
    let mut stale = refreshed;
    stale.status.last_heartbeat_time = chrono::Utc::now() - chrono::Duration::seconds(600);
    core.store.update_cluster_status(stale).await.unwrap();

    core.monitor.sweep().await;
    let expired = core.store.get_cluster("c1").await.unwrap().unwrap();
    assert_eq!(expired.status.phase, ClusterPhase::Offline);
}

#[tokio::test]
async fn aggregate_flows_into_records() {
    let core = spawn_core(Duration::from_secs(60)).await;
    core.store.add_namespace_mapping("c1", "prod", "fleet-prod");

    let stream = TcpStream::connect(core.addr).await.unwrap();
    let (read_half, write_half) = stream.into_split();
    let mut reader = EnvelopeReader::new(read_half);
    let mut writer = EnvelopeWriter::new(write_half);

    writer
        .send(&Envelope::new(message::REGISTER, "c1", String::new()))
        .await
        .unwrap();
    assert_eq!(reader.next().await.unwrap().unwrap().kind, "RegisterSuccess");

    let body = serde_json::json!({
        "list": [{
            "resourceRef": {"apiVersion": "v1", "kind": "Service"},
            "aggregateRule": "svc-rule",
            "aggregatePolicy": "svc-policy",
            "targetResourceData": [{
                "namespace": "prod",
                "resourceInfoList": [{"name": "web", "resourceData": "{}"}],
            }],
        }],
    });
    writer
        .send(&Envelope::new(message::AGGREGATE, "c1", body.to_string()))
        .await
        .unwrap();
    assert_eq!(
        reader.next().await.unwrap().unwrap().kind,
        "AggregateSuccess"
    );

    let record = core
        .store
        .get_record("fleet-prod", "svc-policy-svc-rule-service")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.contributions.len(), 1);
    assert_eq!(record.contributions[0].cluster, "c1");
}
