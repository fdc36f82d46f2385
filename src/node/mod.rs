//! The node: binds the transport, wires membership, gossip, scheduling and
//! metrics together, and drives the inbound frame dispatcher.
mod api;


pub use api::{ClusterView, MetricsScope, NodeApi, PushEvent};

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::args::{BindMode, BootstrapAddr, ScenarioSpec, SwarmArgs};
use crate::cluster::{spawn_liveness, NodeIdentity, NodeInfo, PeerRegistry};
use crate::config::NodeConfig;
use crate::error::{AppError, AppResult, MetricsError, TransportError};
use crate::gossip::{ControlPayload, Gossip, RequesterPing};
use crate::metrics::{AggregateOutcome, Aggregator, Metrics, MetricsRegistry, Snapshot};
use crate::scenario::{ScenarioManager, ScenarioRegistry};
use crate::shutdown::{self, ShutdownSender};
use crate::transport::{
    InboundFrame, Payload, RequesterInfo, SnapshotRequest, SnapshotResponse, Transport,
};

pub struct NodeOptions {
    pub host: BindMode,
    pub port: u16,
    pub bootstrap: Vec<BootstrapAddr>,
    pub job: Option<ScenarioSpec>,
    pub stats: bool,
    pub metrics_snapshot: Option<PathBuf>,
    pub web_port: Option<u16>,
}

impl From<&SwarmArgs> for NodeOptions {
    fn from(args: &SwarmArgs) -> Self {
        NodeOptions {
            host: args.host.clone(),
            port: args.port,
            bootstrap: args.bootstrap_addrs(),
            job: args.job.clone(),
            stats: args.stats,
            metrics_snapshot: args.metrics_snapshot.clone().map(PathBuf::from),
            web_port: args.web_port,
        }
    }
}

pub(crate) struct NodeInner {
    options: NodeOptions,
    config: Arc<NodeConfig>,
    registry: Arc<PeerRegistry>,
    transport: Transport,
    gossip: Gossip,
    manager: ScenarioManager,
    metrics: Metrics,
    aggregator: Aggregator,
    shutdown: ShutdownSender,
    push_tx: broadcast::Sender<PushEvent>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
    fatal: Mutex<Option<AppError>>,
}

/// One symmetric cluster node running the full stack.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

/// Resolve the bind mode to a concrete host string. "public" picks the
/// address a default route would use; falls back to loopback when the
/// machine has none.
fn resolve_bind_host(mode: &BindMode) -> String {
    match mode {
        BindMode::Local => "127.0.0.1".to_owned(),
        BindMode::Explicit(ip) => ip.to_string(),
        BindMode::Public => match routable_ip() {
            Some(ip) => ip.to_string(),
            None => {
                warn!("No routable address found; binding to 127.0.0.1");
                "127.0.0.1".to_owned()
            }
        },
    }
}

fn routable_ip() -> Option<IpAddr> {
    // A connected UDP socket never sends a packet; it just asks the OS which
    // source address it would pick.
    let socket = std::net::UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    socket.local_addr().map(|addr| addr.ip()).ok()
}

impl Node {
    /// Bind the listener and assemble the stack. A bind failure is the
    /// port-conflict exit path.
    pub async fn bind(
        options: NodeOptions,
        config: NodeConfig,
        scenarios: ScenarioRegistry,
    ) -> AppResult<Self> {
        let config = Arc::new(config);
        let host = resolve_bind_host(&options.host);
        let bind_addr = format!("{}:{}", host, options.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|err| {
            AppError::transport(TransportError::Bind {
                addr: bind_addr.clone(),
                source: err,
            })
        })?;
        let port = listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(options.port);
        let local = NodeInfo::new(host, port);
        info!(
            "Node {} listening on {}",
            local.identity.short(),
            local.listen_addr()
        );

        let metrics: Metrics = Arc::new(MetricsRegistry::new(
            local.identity,
            config.event_buffer_capacity,
        ));
        let registry = Arc::new(PeerRegistry::new(
            local.clone(),
            config.max_peers,
            config.quarantine,
            config.suspect_to_dead,
        ));
        let (shutdown_tx, _) = shutdown::channel();

        let (transport, inbound_rx) = Transport::start(
            listener,
            local,
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&metrics),
            shutdown_tx.clone(),
        );
        let gossip = Gossip::new(
            Arc::clone(&registry),
            transport.clone(),
            Arc::clone(&config),
            Arc::clone(&metrics),
        );
        let http = reqwest::Client::builder()
            .build()
            .map_err(AppError::from)?;
        let manager = ScenarioManager::new(
            Arc::clone(&registry),
            scenarios,
            Arc::clone(&config),
            Arc::clone(&metrics),
            gossip.clone(),
            http,
            shutdown_tx.clone(),
        );
        let (push_tx, _) = broadcast::channel(64);

        Ok(Node {
            inner: Arc::new(NodeInner {
                options,
                config,
                registry,
                transport,
                gossip,
                manager,
                metrics,
                aggregator: Aggregator::new(),
                shutdown: shutdown_tx,
                push_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                fatal: Mutex::new(None),
            }),
        })
    }

    #[must_use]
    pub fn identity(&self) -> NodeIdentity {
        self.inner.transport.local().identity
    }

    #[must_use]
    pub fn listen_addr(&self) -> String {
        self.inner.transport.local().listen_addr()
    }

    #[must_use]
    pub fn api(&self) -> NodeApi {
        NodeApi::new(self.clone())
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.inner.shutdown.send(());
    }

    /// Bootstrap, start the periodic loops and run the frame dispatcher
    /// until shutdown, then tear down gracefully.
    pub async fn run(&self) -> AppResult<()> {
        let inner = &self.inner;

        for addr in &inner.options.bootstrap {
            match inner.transport.connect_addr(&addr.host, addr.port).await {
                Ok(peer) => info!("Bootstrapped to {} ({})", addr, peer.short()),
                Err(err) => warn!("Bootstrap to {} failed: {}", addr, err),
            }
        }

        let _ = inner.gossip.spawn_exchange_loop(inner.shutdown.subscribe());
        let _ = spawn_liveness(
            Arc::clone(&inner.registry),
            inner.transport.clone(),
            Arc::clone(&inner.config),
            inner.shutdown.subscribe(),
        );
        self.spawn_push_loop();
        if inner.options.stats {
            self.spawn_stats_loop();
        }
        if let Some(port) = inner.options.web_port {
            debug!("Dashboard contract exposed for web port {}", port);
        }

        if let Some(job) = &inner.options.job {
            let id = inner.manager.start_local(&job.to_string()).await?;
            info!("Started scenario {} from CLI job {}", id.short(), job);
        }

        let inbound_rx = {
            let mut slot = inner.inbound_rx.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        // run() is single-shot per node.
        let Some(mut inbound_rx) = inbound_rx else {
            return Ok(());
        };

        let mut shutdown_rx = inner.shutdown.subscribe();
        loop {
            tokio::select! {
                frame = inbound_rx.recv() => match frame {
                    Some(frame) => self.dispatch(frame).await,
                    None => break,
                },
                _ = shutdown_rx.recv() => break,
            }
        }

        self.graceful_shutdown().await?;
        let fatal = {
            let mut slot = inner.fatal.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn dispatch(&self, frame: InboundFrame) {
        let inner = &self.inner;
        match frame.payload {
            Payload::Gossip(payload) => inner.gossip.handle_peer_exchange(frame.from, payload),
            Payload::Control(envelope) => {
                if let Some(payload) = inner.gossip.handle_control(frame.from, envelope).await {
                    self.apply_control(payload).await;
                }
            }
            Payload::SnapshotReq(request) => {
                self.respond_snapshot(RequesterPing {
                    request_id: request.request_id,
                    requester: request.requester,
                });
            }
            Payload::SnapshotResp(response) => {
                let SnapshotResponse {
                    request_id,
                    snapshot,
                } = *response;
                inner.aggregator.handle_response(&request_id, snapshot);
            }
            // Session-level frames never reach the dispatcher.
            Payload::Hello(_)
            | Payload::HelloAck(_)
            | Payload::Ping { .. }
            | Payload::Pong { .. }
            | Payload::Bye => {}
        }
    }

    async fn apply_control(&self, payload: ControlPayload) {
        let inner = &self.inner;
        match payload {
            ControlPayload::ScenarioStart { scenario } => {
                inner.manager.start_from_gossip(scenario).await;
            }
            ControlPayload::ScenarioStop { scenario_id } => {
                inner.manager.stop(scenario_id);
            }
            ControlPayload::SnapshotPing { request } => self.respond_snapshot(request),
        }
    }

    /// Reply with the local snapshot directly to the requester, opening a
    /// session if needed.
    fn respond_snapshot(&self, request: RequesterPing) {
        let inner = Arc::clone(&self.inner);
        let node = self.clone();
        if request.requester.identity == self.identity() {
            return;
        }
        tokio::spawn(async move {
            let snapshot = match inner.metrics.snapshot() {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    node.record_fatal(err);
                    return;
                }
            };
            let response = Payload::SnapshotResp(Box::new(SnapshotResponse {
                request_id: request.request_id,
                snapshot,
            }));
            let requester = request.requester;
            if let Err(err) = inner
                .transport
                .send_with_addr(requester.identity, &requester.host, requester.port, response)
                .await
            {
                debug!(
                    "Snapshot response to {} failed: {}",
                    requester.identity.short(),
                    err
                );
            }
        });
    }

    /// Capture local state and fan the request out: direct SNAPSHOT_REQ to
    /// every alive peer plus a gossiped ping for peers beyond our sessions.
    pub async fn cluster_snapshot(&self) -> AppResult<AggregateOutcome> {
        let inner = &self.inner;
        let local = self.local_snapshot()?;
        let expected: Vec<NodeIdentity> = inner
            .registry
            .alive_peers()
            .iter()
            .map(|peer| peer.identity)
            .collect();
        if expected.is_empty() {
            return Ok(AggregateOutcome {
                snapshot: local,
                partial: false,
                missing: Vec::new(),
                responders: 0,
            });
        }

        let request_id = Aggregator::new_request_id();
        let receiver = inner.aggregator.register(&request_id);
        let local_info = inner.transport.local();
        let requester = RequesterInfo {
            identity: local_info.identity,
            host: local_info.host.clone(),
            port: local_info.port,
        };
        for peer in &expected {
            let request = Payload::SnapshotReq(SnapshotRequest {
                request_id: request_id.clone(),
                requester: requester.clone(),
            });
            if let Err(err) = inner.transport.send(*peer, request).await {
                debug!("Snapshot request to {} failed: {}", peer.short(), err);
            }
        }
        inner
            .gossip
            .broadcast(ControlPayload::SnapshotPing {
                request: RequesterPing {
                    request_id: request_id.clone(),
                    requester,
                },
            })
            .await;

        Ok(inner
            .aggregator
            .collect(
                &request_id,
                receiver,
                local,
                expected,
                inner.config.snapshot_timeout,
            )
            .await)
    }

    pub fn local_snapshot(&self) -> AppResult<Snapshot> {
        match self.inner.metrics.snapshot() {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                // Registry corruption is process-terminating.
                {
                    let mut slot = self.inner.fatal.lock().unwrap_or_else(|e| e.into_inner());
                    slot.get_or_insert(AppError::metrics(MetricsError::RegistryCorrupted {
                        detail: "snapshot failed",
                    }));
                }
                error!("Local snapshot failed: {}", err);
                self.trigger_shutdown();
                Err(err)
            }
        }
    }

    fn record_fatal(&self, err: AppError) {
        error!("Fatal: {}", err);
        {
            let mut slot = self.inner.fatal.lock().unwrap_or_else(|e| e.into_inner());
            slot.get_or_insert(err);
        }
        self.trigger_shutdown();
    }

    fn spawn_push_loop(&self) {
        let node = self.clone();
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.recv() => break,
                }
                let inner = &node.inner;
                let _ = inner.push_tx.send(PushEvent::ClusterUpdate {
                    alive: inner.registry.alive_len(),
                });
                let _ = inner.push_tx.send(PushEvent::MetricsUpdate {
                    requests_total: inner.metrics.counter_family_total("http_requests_total"),
                    journeys_total: inner
                        .metrics
                        .counter_family_total("journey_executions_total"),
                });
                let _ = inner.push_tx.send(PushEvent::ScenariosUpdate {
                    active: inner.manager.active_count(),
                });
            }
        });
    }

    fn spawn_stats_loop(&self) {
        let node = self.clone();
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.recv() => break,
                }
                let inner = &node.inner;
                let local = inner.transport.local();
                info!(
                    "{}:{} alive={} scenarios={} journeys={}",
                    local.identity.short(),
                    local.port,
                    inner.registry.alive_len(),
                    inner.manager.active_count(),
                    inner
                        .metrics
                        .counter_family_total("journey_executions_total"),
                );
            }
        });
    }

    /// Shutdown order: stop intake, drain scenarios, say goodbye, flush the
    /// snapshot file.
    async fn graceful_shutdown(&self) -> AppResult<()> {
        let inner = &self.inner;
        info!("Shutting down node...");
        inner.manager.drain_all();
        inner
            .manager
            .wait_idle(inner.config.drain_timeout + Duration::from_secs(1))
            .await;
        inner.transport.shutdown_sessions().await;

        if let Some(path) = &inner.options.metrics_snapshot {
            let snapshot = inner.metrics.snapshot()?;
            let encoded = serde_json::to_string_pretty(&snapshot)
                .map_err(|err| AppError::metrics(MetricsError::SnapshotEncode { source: err }))?;
            std::fs::write(path, encoded).map_err(|err| {
                AppError::metrics(MetricsError::SnapshotWrite {
                    path: path.display().to_string(),
                    source: err,
                })
            })?;
            info!("Metrics snapshot written to {}", path.display());
        }
        info!("Node shutdown complete.");
        Ok(())
    }

    pub(crate) fn inner(&self) -> &NodeInner {
        &self.inner
    }
}

impl NodeInner {
    pub(crate) fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    pub(crate) fn manager(&self) -> &ScenarioManager {
        &self.manager
    }

    pub(crate) fn gossip(&self) -> &Gossip {
        &self.gossip
    }

    pub(crate) fn push_sender(&self) -> &broadcast::Sender<PushEvent> {
        &self.push_tx
    }
}
