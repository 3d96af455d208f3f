//! The agent's half of the duplex stream.
//!
//! Connects once, registers, seeds the policy index from the register
//! response, then heartbeats on a fixed period and forwards watch-controller
//! contributions until the stream closes or the agent drains. Failure
//! responses are logged and retried implicitly by the next cycle — the
//! operations are idempotent.

use crate::{
    policies::{PolicyIndex, PolicyManager},
    render::Render,
    watch::{ControllerContext, ResourceWatcher},
};
use ahash::AHashMap as HashMap;
use fleetlink_core::{
    cluster::{Addon, Condition},
    matching::NamespaceLabels,
    message::{self, Envelope, FailureBody, HeartbeatRequest, RegisterRequest, RegisterResponse},
    wire::{EnvelopeReader, EnvelopeWriter},
    KindRef, WatchPolicy,
};
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    time::{self, Duration, MissedTickBehavior},
};

const UPLINK_CAPACITY: usize = 64;

/// Source of the agent's own status reports.
pub trait StatusReporter: Send + Sync {
    fn addons(&self) -> Vec<Addon>;
    fn conditions(&self) -> Vec<Condition>;
    fn healthy(&self) -> bool;
}

/// Fixed status for agents without a live health source.
#[derive(Clone, Debug, Default)]
pub struct StaticStatus {
    pub addons: Vec<Addon>,
    pub healthy: bool,
}

impl StatusReporter for StaticStatus {
    fn addons(&self) -> Vec<Addon> {
        self.addons.clone()
    }

    fn conditions(&self) -> Vec<Condition> {
        Vec::new()
    }

    fn healthy(&self) -> bool {
        self.healthy
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub cluster_name: String,
    pub heartbeat_period: Duration,
    /// Worker pool size per watch controller.
    pub workers: usize,
}

/// The per-cluster agent runtime.
pub struct Agent {
    config: AgentConfig,
    policies: Arc<PolicyManager>,
    status: Arc<dyn StatusReporter>,
    uplink_rx: mpsc::Receiver<Envelope>,
}

// === impl Agent ===

impl Agent {
    pub fn new(
        config: AgentConfig,
        watchers: HashMap<KindRef, Arc<dyn ResourceWatcher>>,
        namespaces: Arc<dyn NamespaceLabels + Send + Sync>,
        render: Arc<dyn Render>,
        status: Arc<dyn StatusReporter>,
    ) -> Self {
        let (uplink_tx, uplink_rx) = mpsc::channel(UPLINK_CAPACITY);
        let ctx = ControllerContext {
            cluster_name: config.cluster_name.clone(),
            policies: PolicyIndex::default(),
            namespaces,
            render,
            uplink: uplink_tx,
            workers: config.workers,
        };
        let policies = Arc::new(PolicyManager::new(watchers, ctx));
        Self {
            config,
            policies,
            status,
            uplink_rx,
        }
    }

    /// The policy manager, for embedders that feed policy changes from a
    /// source other than the register response.
    pub fn policies(&self) -> Arc<PolicyManager> {
        self.policies.clone()
    }

    /// Runs the session over an established stream until the stream closes
    /// or the drain signal fires. Reconnecting is the embedder's loop.
    pub async fn run<I>(mut self, io: I, shutdown: drain::Watch) -> anyhow::Result<()>
    where
        I: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_io, write_io) = tokio::io::split(io);
        let mut reader = EnvelopeReader::new(read_io);
        let mut writer = EnvelopeWriter::new(write_io);
        let cluster = self.config.cluster_name.clone();

        let register = RegisterRequest {
            addons: self.status.addons(),
        };
        writer
            .send(&Envelope::request(message::REGISTER, &cluster, &register)?)
            .await?;
        tracing::info!(%cluster, "Register sent");

        let mut heartbeat = time::interval(self.config.heartbeat_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and the register just went
        // out; skip it.
        heartbeat.tick().await;

        tokio::pin! {
            let drained = shutdown.signaled();
        }
        loop {
            tokio::select! {
                result = reader.next() => match result? {
                    Some(envelope) => self.handle_response(envelope).await,
                    None => {
                        tracing::info!(%cluster, "Stream closed by the core");
                        break;
                    }
                },
                Some(envelope) = self.uplink_rx.recv() => {
                    writer.send(&envelope).await?;
                },
                _ = heartbeat.tick() => {
                    let request = HeartbeatRequest {
                        addons: self.status.addons(),
                        conditions: self.status.conditions(),
                        healthy: self.status.healthy(),
                    };
                    writer
                        .send(&Envelope::request(message::HEARTBEAT, &cluster, &request)?)
                        .await?;
                },
                _ = &mut drained => {
                    tracing::info!(%cluster, "Agent draining");
                    break;
                }
            }
        }

        self.policies.shutdown().await;
        Ok(())
    }

    async fn handle_response(&self, envelope: Envelope) {
        match envelope.kind.as_str() {
            "RegisterSuccess" => {
                if envelope.body.is_empty() {
                    return;
                }
                match serde_json::from_str::<RegisterResponse>(&envelope.body) {
                    Ok(response) => self.seed_policies(response).await,
                    Err(error) => {
                        tracing::warn!(%error, "Failed to decode register response")
                    }
                }
            }
            kind if kind.ends_with("Failed") => {
                let detail = serde_json::from_str::<FailureBody>(&envelope.body)
                    .map(|body| body.message)
                    .unwrap_or_default();
                tracing::warn!(kind, %detail, "Request failed");
            }
            kind => tracing::debug!(kind, "Acknowledged"),
        }
    }

    /// Installs the policies returned on register, starting their watch
    /// controllers. Entries that fail to decode or apply are skipped.
    async fn seed_policies(&self, response: RegisterResponse) {
        for raw in &response.aggregate_policies {
            match serde_json::from_str::<WatchPolicy>(raw) {
                Ok(policy) => {
                    let id = policy.id.clone();
                    if let Err(error) = self.policies.apply(policy).await {
                        tracing::warn!(policy = %id, %error, "Failed to apply policy");
                    }
                }
                Err(error) => tracing::warn!(%error, "Failed to decode policy"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{render::FieldRender, watch::WatchEvent};
    use fleetlink_core::{ClusterObject, Labels, MatchEntry, MatchRule, ObjectKey, PolicyRef, RenderTemplate};
    use parking_lot::Mutex;

    struct StaticWatcher {
        kind: KindRef,
        objects: Mutex<Vec<ClusterObject>>,
    }

    #[async_trait::async_trait]
    impl ResourceWatcher for StaticWatcher {
        fn kind(&self) -> KindRef {
            self.kind.clone()
        }

        async fn list(&self) -> anyhow::Result<Vec<ClusterObject>> {
            Ok(self.objects.lock().clone())
        }

        async fn watch(&self) -> anyhow::Result<mpsc::Receiver<WatchEvent>> {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(async move {
                tx.closed().await;
            });
            Ok(rx)
        }

        async fn get(&self, key: &ObjectKey) -> anyhow::Result<Option<ClusterObject>> {
            Ok(self.objects.lock().iter().find(|o| o.key() == *key).cloned())
        }
    }

    fn serialized_policy() -> String {
        let policy = WatchPolicy {
            id: PolicyRef::new("fleet-system", "svc-policy"),
            target: KindRef::new("v1", "Service"),
            rule: "svc-rule".to_string(),
            template: RenderTemplate {
                expr: String::new(),
                output_field: String::new(),
            },
            requests: Some(MatchRule {
                selector: None,
                entries: vec![MatchEntry {
                    namespace: "prod".to_string(),
                    names: vec![],
                    name_pattern: None,
                }],
            }),
            ignores: None,
        };
        serde_json::to_string(&policy).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn registers_seeds_policies_and_heartbeats() {
        let kind = KindRef::new("v1", "Service");
        let watcher = Arc::new(StaticWatcher {
            kind: kind.clone(),
            objects: Mutex::new(vec![ClusterObject {
                kind: kind.clone(),
                namespace: "prod".to_string(),
                name: "web".to_string(),
                labels: Labels::default(),
                terminating: false,
                data: serde_json::json!({"spec": {}}),
            }]),
        });
        let mut watchers: HashMap<KindRef, Arc<dyn ResourceWatcher>> = HashMap::new();
        watchers.insert(kind.clone(), watcher);

        let agent = Agent::new(
            AgentConfig {
                cluster_name: "c1".to_string(),
                heartbeat_period: Duration::from_secs(30),
                workers: 1,
            },
            watchers,
            Arc::new(std::collections::HashMap::<String, Labels>::new()),
            Arc::new(FieldRender),
            Arc::new(StaticStatus {
                addons: vec![Addon {
                    name: "dns".to_string(),
                    properties: None,
                }],
                healthy: true,
            }),
        );
        let manager = agent.policies();

        let (agent_io, core_io) = tokio::io::duplex(4096);
        let (signal, watch) = drain::channel();
        let session = tokio::spawn(agent.run(agent_io, watch));

        let (core_read, core_write) = tokio::io::split(core_io);
        let mut reader = EnvelopeReader::new(core_read);
        let mut writer = EnvelopeWriter::new(core_write);

        // Register arrives first, carrying the addon set.
        let register = reader.next().await.unwrap().unwrap();
        assert_eq!(register.kind, message::REGISTER);
        let body: RegisterRequest = serde_json::from_str(&register.body).unwrap();
        assert_eq!(body.addons[0].name, "dns");

        // Answer with a policy; the agent starts its watch controller and
        // the matched object flows back as an aggregate request.
        let response = RegisterResponse {
            cluster_resources: vec![],
            aggregate_policies: vec![serialized_policy()],
            aggregate_rules: vec![],
        };
        writer
            .send(&Envelope::success(message::REGISTER, "c1", Some(&response)).unwrap())
            .await
            .unwrap();

        let mut saw_aggregate = false;
        let mut saw_heartbeat = false;
        while !(saw_aggregate && saw_heartbeat) {
            let envelope = reader.next().await.unwrap().unwrap();
            match envelope.kind.as_str() {
                message::AGGREGATE => saw_aggregate = true,
                message::HEARTBEAT => {
                    let body: HeartbeatRequest = serde_json::from_str(&envelope.body).unwrap();
                    assert!(body.healthy);
                    saw_heartbeat = true;
                }
                other => panic!("unexpected message {other}"),
            }
        }
        assert!(manager.is_running(&kind).await);

        // Draining stops the controllers and ends the session.
        signal.drain().await;
        session.await.unwrap().unwrap();
        assert!(!manager.is_running(&kind).await);
    }
}
