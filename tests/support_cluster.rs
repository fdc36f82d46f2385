//! Shared helpers for the end-to-end cluster tests: fast-tick configs,
//! in-process nodes on ephemeral loopback ports, and synthetic journeys
//! that count executions without touching the network.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ironswarm::args::{BindMode, PositiveF64};
use ironswarm::config::NodeConfig;
use ironswarm::datapool::{DatapoolDescriptor, Row};
use ironswarm::error::AppResult;
use ironswarm::journey::{Journey, JourneyContext, JourneyFailure};
use ironswarm::node::{Node, NodeOptions};
use ironswarm::scenario::{
    JourneyBlueprint, JourneyDef, ScenarioBlueprint, ScenarioRegistry, VolumeModel,
};

/// Config tuned so cluster behaviors converge in test time.
pub fn fast_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.gossip_interval = Duration::from_millis(200);
    config.ping_interval = Duration::from_millis(500);
    config.ping_timeout = Duration::from_millis(300);
    config.suspect_to_dead = Duration::from_secs(2);
    config.tick = Duration::from_millis(50);
    config.drain_timeout = Duration::from_secs(2);
    config.snapshot_timeout = Duration::from_secs(2);
    config.tombstone_window = Duration::from_secs(5);
    config
}

pub struct CountingJourney {
    pub runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Journey for CountingJourney {
    async fn execute(&self, _row: Option<Row>, ctx: &JourneyContext) -> Result<(), JourneyFailure> {
        if ctx.is_cancelled() {
            return Ok(());
        }
        self.runs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A registry with one synthetic scenario, `test:pulse`, whose journey just
/// counts runs. Register the same spec on every node so gossiped starts
/// resolve everywhere.
pub fn pulse_registry(
    runs: Arc<AtomicUsize>,
    target_rps: f64,
    duration_s: f64,
    datapool: Option<DatapoolDescriptor>,
) -> ScenarioRegistry {
    let mut registry = ScenarioRegistry::new();
    registry.register("test:pulse", move || ScenarioBlueprint {
        start_delay: Duration::ZERO,
        journeys: vec![JourneyBlueprint {
            def: JourneyDef {
                name: "pulse".to_owned(),
                volume: VolumeModel::new(
                    PositiveF64::clamped(target_rps),
                    PositiveF64::clamped(duration_s),
                    0.0,
                ),
                datapool: datapool.clone(),
            },
            journey: Arc::new(CountingJourney {
                runs: Arc::clone(&runs),
            }),
        }],
    });
    registry
}

pub struct TestNode {
    pub node: Node,
    pub runner: tokio::task::JoinHandle<AppResult<()>>,
}

impl TestNode {
    pub async fn shutdown(self) -> AppResult<()> {
        self.node.trigger_shutdown();
        self.runner.await?
    }
}

/// Bind and run one node on an ephemeral loopback port.
pub async fn start_node(
    bootstrap: Vec<ironswarm::args::BootstrapAddr>,
    config: NodeConfig,
    registry: ScenarioRegistry,
) -> AppResult<TestNode> {
    let options = NodeOptions {
        host: BindMode::Local,
        port: 0,
        bootstrap,
        job: None,
        stats: false,
        metrics_snapshot: None,
        web_port: None,
    };
    let node = Node::bind(options, config, registry).await?;
    let runner = {
        let node = node.clone();
        tokio::spawn(async move { node.run().await })
    };
    Ok(TestNode { node, runner })
}

pub fn bootstrap_to(node: &Node) -> Vec<ironswarm::args::BootstrapAddr> {
    let addr = node.listen_addr();
    match addr.parse::<std::net::SocketAddr>() {
        Ok(parsed) => vec![ironswarm::args::BootstrapAddr {
            host: parsed.ip().to_string(),
            port: parsed.port(),
        }],
        Err(_) => Vec::new(),
    }
}

/// Poll until `probe` returns true or the deadline passes.
pub async fn wait_until<F>(timeout: Duration, mut probe: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    probe()
}
