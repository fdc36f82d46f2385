use std::time::Duration;

use serde::Deserialize;

use crate::args::{PositiveU64, PositiveUsize};

/// Fully resolved runtime tunables for one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    // transport
    pub max_frame_bytes: usize,
    pub session_queue_capacity: usize,
    pub control_send_timeout: Duration,
    pub handshake_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,

    // liveness
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub suspect_to_dead: Duration,
    pub quarantine: Duration,
    pub max_peers: usize,

    // gossip
    pub gossip_interval: Duration,
    pub fanout: usize,
    pub freshness_window: Duration,
    pub recent_set_capacity: usize,
    pub recent_set_retention: Duration,
    pub tombstone_window: Duration,

    // scheduling
    pub tick: Duration,
    pub drain_timeout: Duration,
    pub max_in_flight_journeys: usize,
    pub max_scenarios: usize,
    pub max_pacers_per_scenario: usize,
    pub request_timeout: Duration,

    // data & metrics
    pub datapool_channel_capacity: usize,
    pub event_buffer_capacity: usize,
    pub snapshot_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 4 * 1024 * 1024,
            session_queue_capacity: 1024,
            control_send_timeout: Duration::from_millis(1000),
            handshake_timeout: Duration::from_secs(5),
            reconnect_base: Duration::from_millis(500),
            reconnect_cap: Duration::from_secs(30),

            ping_interval: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(2),
            suspect_to_dead: Duration::from_secs(30),
            quarantine: Duration::from_secs(300),
            max_peers: 1024,

            gossip_interval: Duration::from_secs(3),
            fanout: 3,
            freshness_window: Duration::from_secs(30),
            recent_set_capacity: 4096,
            recent_set_retention: Duration::from_secs(120),
            tombstone_window: Duration::from_secs(5),

            tick: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(10),
            max_in_flight_journeys: 1024,
            max_scenarios: 16,
            max_pacers_per_scenario: 64,
            request_timeout: Duration::from_secs(30),

            datapool_channel_capacity: 1024,
            event_buffer_capacity: 4096,
            snapshot_timeout: Duration::from_secs(2),
        }
    }
}

/// On-disk config shape. Every field is optional; omitted fields keep their
/// built-in default. Counts and timeouts deserialize through the positive
/// newtypes, so a zero in the file is rejected at parse time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub cluster: ClusterSection,
    #[serde(default)]
    pub gossip: GossipSection,
    #[serde(default)]
    pub scheduling: SchedulingSection,
    #[serde(default)]
    pub metrics: MetricsSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportSection {
    pub max_frame_bytes: Option<PositiveUsize>,
    pub session_queue_capacity: Option<PositiveUsize>,
    pub control_send_timeout_ms: Option<PositiveU64>,
    pub handshake_timeout_ms: Option<PositiveU64>,
    pub reconnect_base_ms: Option<PositiveU64>,
    pub reconnect_cap_ms: Option<PositiveU64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSection {
    pub ping_interval_ms: Option<PositiveU64>,
    pub ping_timeout_ms: Option<PositiveU64>,
    pub suspect_to_dead_ms: Option<PositiveU64>,
    pub quarantine_ms: Option<PositiveU64>,
    pub max_peers: Option<PositiveUsize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GossipSection {
    pub interval_ms: Option<PositiveU64>,
    pub fanout: Option<PositiveUsize>,
    pub freshness_window_ms: Option<PositiveU64>,
    pub recent_set_capacity: Option<PositiveUsize>,
    pub recent_set_retention_ms: Option<PositiveU64>,
    pub tombstone_window_ms: Option<PositiveU64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulingSection {
    pub tick_ms: Option<PositiveU64>,
    pub drain_timeout_ms: Option<PositiveU64>,
    pub max_in_flight_journeys: Option<PositiveUsize>,
    pub max_scenarios: Option<PositiveUsize>,
    pub max_pacers_per_scenario: Option<PositiveUsize>,
    pub request_timeout_ms: Option<PositiveU64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    pub datapool_channel_capacity: Option<PositiveUsize>,
    pub event_buffer_capacity: Option<PositiveUsize>,
    pub snapshot_timeout_ms: Option<PositiveU64>,
}

fn apply_ms(target: &mut Duration, value: Option<PositiveU64>) {
    if let Some(ms) = value {
        *target = Duration::from_millis(ms.get());
    }
}

fn apply_val(target: &mut usize, value: Option<PositiveUsize>) {
    if let Some(value) = value {
        *target = value.get();
    }
}

impl NodeConfig {
    /// Layer a parsed config file over the defaults.
    pub fn apply_file(&mut self, file: &ConfigFile) {
        apply_val(&mut self.max_frame_bytes, file.transport.max_frame_bytes);
        apply_val(
            &mut self.session_queue_capacity,
            file.transport.session_queue_capacity,
        );
        apply_ms(
            &mut self.control_send_timeout,
            file.transport.control_send_timeout_ms,
        );
        apply_ms(
            &mut self.handshake_timeout,
            file.transport.handshake_timeout_ms,
        );
        apply_ms(&mut self.reconnect_base, file.transport.reconnect_base_ms);
        apply_ms(&mut self.reconnect_cap, file.transport.reconnect_cap_ms);

        apply_ms(&mut self.ping_interval, file.cluster.ping_interval_ms);
        apply_ms(&mut self.ping_timeout, file.cluster.ping_timeout_ms);
        apply_ms(&mut self.suspect_to_dead, file.cluster.suspect_to_dead_ms);
        apply_ms(&mut self.quarantine, file.cluster.quarantine_ms);
        apply_val(&mut self.max_peers, file.cluster.max_peers);

        apply_ms(&mut self.gossip_interval, file.gossip.interval_ms);
        apply_val(&mut self.fanout, file.gossip.fanout);
        apply_ms(&mut self.freshness_window, file.gossip.freshness_window_ms);
        apply_val(
            &mut self.recent_set_capacity,
            file.gossip.recent_set_capacity,
        );
        apply_ms(
            &mut self.recent_set_retention,
            file.gossip.recent_set_retention_ms,
        );
        apply_ms(&mut self.tombstone_window, file.gossip.tombstone_window_ms);

        apply_ms(&mut self.tick, file.scheduling.tick_ms);
        apply_ms(&mut self.drain_timeout, file.scheduling.drain_timeout_ms);
        apply_val(
            &mut self.max_in_flight_journeys,
            file.scheduling.max_in_flight_journeys,
        );
        apply_val(&mut self.max_scenarios, file.scheduling.max_scenarios);
        apply_val(
            &mut self.max_pacers_per_scenario,
            file.scheduling.max_pacers_per_scenario,
        );
        apply_ms(&mut self.request_timeout, file.scheduling.request_timeout_ms);

        apply_val(
            &mut self.datapool_channel_capacity,
            file.metrics.datapool_channel_capacity,
        );
        apply_val(
            &mut self.event_buffer_capacity,
            file.metrics.event_buffer_capacity,
        );
        apply_ms(&mut self.snapshot_timeout, file.metrics.snapshot_timeout_ms);
    }
}
