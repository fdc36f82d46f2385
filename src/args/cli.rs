use clap::Parser;

use super::parsers::parse_bootstrap_list;
use super::types::{BindMode, BootstrapAddr, ScenarioSpec};

pub const DEFAULT_PORT: u16 = 42042;

#[derive(Debug, Parser, Clone)]
#[clap(
    name = "ironswarm",
    version,
    about = "Peer-to-peer distributed load generator: symmetric worker nodes gossip membership and control, pace journeys against a shared cluster-wide target, and aggregate latency/throughput telemetry on demand."
)]
pub struct SwarmArgs {
    /// Bootstrap address(es), comma-separated; may repeat (tcp://host:port)
    #[arg(short = 'b', long = "bootstrap", value_parser = parse_bootstrap_list)]
    pub bootstrap: Vec<Vec<BootstrapAddr>>,

    /// Bind mode: "local", "public", or an explicit IP
    #[arg(short = 'H', long = "host", default_value = "public")]
    pub host: BindMode,

    /// Listen port
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Scenario spec to start on this node (module:attr)
    #[arg(short = 'j', long = "job")]
    pub job: Option<ScenarioSpec>,

    /// Print a periodic stats line
    #[arg(short = 's', long = "stats")]
    pub stats: bool,

    /// Write logs to this file instead of stderr
    #[arg(long = "log-file")]
    pub log_file: Option<String>,

    /// On graceful shutdown, write the local metrics snapshot to this path
    #[arg(long = "metrics-snapshot")]
    pub metrics_snapshot: Option<String>,

    /// Expose the dashboard listener on this port
    #[arg(long = "web-port")]
    pub web_port: Option<u16>,

    /// Load tunables from a TOML config file
    #[arg(long = "config")]
    pub config: Option<String>,

    /// Verbose (debug-level) logging
    #[arg(long = "verbose")]
    pub verbose: bool,
}

impl SwarmArgs {
    /// All bootstrap addresses, flattened across repeated flags.
    #[must_use]
    pub fn bootstrap_addrs(&self) -> Vec<BootstrapAddr> {
        self.bootstrap.iter().flatten().cloned().collect()
    }
}
