use serde::Serialize;
use tokio::sync::broadcast;

use crate::cluster::{NodeInfo, PeerView};
use crate::error::AppResult;
use crate::gossip::ControlPayload;
use crate::metrics::{AggregateOutcome, Snapshot};
use crate::scenario::{ScenarioId, ScenarioStatus};

use super::Node;

/// What the dashboard subsystem sees of the cluster.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterView {
    pub local: NodeInfo,
    pub peers: Vec<PeerView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsScope {
    Local,
    Cluster,
}

/// Push-channel events, emitted at 1 Hz.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PushEvent {
    ClusterUpdate { alive: usize },
    MetricsUpdate { requests_total: u64, journeys_total: u64 },
    ScenariosUpdate { active: usize },
}

/// The surface the core exposes to the (external) dashboard subsystem.
#[derive(Clone)]
pub struct NodeApi {
    node: Node,
}

impl NodeApi {
    pub(super) fn new(node: Node) -> Self {
        NodeApi { node }
    }

    #[must_use]
    pub fn get_cluster(&self) -> ClusterView {
        let inner = self.node.inner();
        ClusterView {
            local: inner.transport().local().clone(),
            peers: inner.registry().peers(),
        }
    }

    /// Local scope snapshots synchronously; cluster scope fans out and obeys
    /// the aggregation deadline.
    pub async fn get_metrics(&self, scope: MetricsScope) -> AppResult<Snapshot> {
        match scope {
            MetricsScope::Local => self.node.local_snapshot(),
            MetricsScope::Cluster => Ok(self.node.cluster_snapshot().await?.snapshot),
        }
    }

    /// Cluster aggregate with the partial flag and non-responder list.
    pub async fn get_cluster_metrics(&self) -> AppResult<AggregateOutcome> {
        self.node.cluster_snapshot().await
    }

    pub async fn start_scenario(&self, spec: &str) -> AppResult<ScenarioId> {
        self.node.inner().manager().start_local(spec).await
    }

    /// Stop locally and tell the cluster. Idempotent either way.
    pub async fn stop_scenario(&self, id: ScenarioId) {
        self.node.inner().manager().stop(id);
        self.node
            .inner()
            .gossip()
            .broadcast(ControlPayload::ScenarioStop { scenario_id: id })
            .await;
    }

    #[must_use]
    pub fn list_scenarios(&self) -> Vec<ScenarioStatus> {
        self.node.inner().manager().list()
    }

    /// Subscribe to the 1 Hz push channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.node.inner().push_sender().subscribe()
    }
}
