use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::args::PositiveF64;
use crate::cluster::{NodeIdentity, NodeInfo, PeerRegistry};
use crate::config::NodeConfig;
use crate::datapool::Row;
use crate::journey::{Journey, JourneyContext, JourneyFailure};
use crate::metrics::{Metrics, MetricsRegistry};
use crate::shutdown;

use super::pacer::{spawn_pacer, test_support::credit_after, PacerSpec};
use super::*;

fn volume(target_rps: f64, duration_s: f64, ramp_s: f64) -> VolumeModel {
    VolumeModel::new(
        PositiveF64::clamped(target_rps),
        PositiveF64::clamped(duration_s),
        ramp_s,
    )
}

#[test]
fn ramp_factor_is_linear_then_flat() {
    let model = volume(100.0, 60.0, 10.0);
    assert!((model.ramp_factor(0.0) - 0.0).abs() < 1e-9);
    assert!((model.ramp_factor(2.5) - 0.25).abs() < 1e-9);
    assert!((model.ramp_factor(10.0) - 1.0).abs() < 1e-9);
    assert!((model.ramp_factor(30.0) - 1.0).abs() < 1e-9);

    let no_ramp = volume(100.0, 60.0, 0.0);
    assert!((no_ramp.ramp_factor(0.0) - 1.0).abs() < 1e-9);
}

#[test]
fn per_node_rate_splits_the_cluster_target() {
    let model = volume(300.0, 10.0, 0.0);
    assert!((model.rate_per_node(3, 5.0) - 100.0).abs() < 1e-9);
    assert!((model.rate_per_node(1, 5.0) - 300.0).abs() < 1e-9);
    // An empty alive-set never divides by zero.
    assert!((model.rate_per_node(0, 5.0) - 300.0).abs() < 1e-9);
}

#[test]
fn credit_accumulator_hits_the_cluster_share() {
    // 300 rps over 3 nodes for 10 s = 1000 launches per node.
    let launched = credit_after(300.0, 3, 0.0, 0.1, 10.0);
    assert!((launched - 1000.0).abs() <= 5.0, "launched {}", launched);

    // Fractional per-tick credits still add up: 7 rps for 10 s = 70.
    let launched = credit_after(7.0, 1, 0.0, 0.1, 10.0);
    assert!((launched - 70.0).abs() <= 5.0, "launched {}", launched);
}

#[test]
fn ramped_launch_rate_is_non_decreasing() {
    // Count launches per 1 s window while ramping over 5 s.
    let mut credit = 0.0;
    let mut windows = [0u32; 8];
    let tick = 0.1;
    let mut t = 0.0;
    while t < 8.0 {
        let ramp = (t / 5.0_f64).clamp(0.0, 1.0);
        credit += 40.0 * ramp * tick;
        while credit >= 1.0 {
            credit -= 1.0;
            windows[t as usize] += 1;
        }
        t += tick;
    }
    for pair in windows.windows(2).take(5) {
        assert!(pair[1] >= pair[0], "windows {:?}", windows);
    }
}

#[test]
fn scenario_id_roundtrips() {
    let id = ScenarioId::generate();
    let encoded = id.to_string();
    let decoded: ScenarioId = match encoded.parse() {
        Ok(decoded) => decoded,
        Err(err) => panic!("Failed to parse scenario id: {}", err),
    };
    assert_eq!(id, decoded);
}

#[test]
fn scenario_def_roundtrips_through_json() {
    let def = ScenarioDef {
        scenario_id: ScenarioId::from_raw(42),
        spec: "demo:http_get".to_owned(),
        started_at_ms: 1_700_000_000_000,
        start_delay_s: 1.5,
        journeys: vec![JourneyDef {
            name: "http_get".to_owned(),
            volume: volume(10.0, 60.0, 5.0),
            datapool: Some(crate::datapool::DatapoolDescriptor::InMemoryOnce {
                rows: vec!["r1".to_owned()],
            }),
        }],
    };
    let encoded = match serde_json::to_string(&def) {
        Ok(encoded) => encoded,
        Err(err) => panic!("Serialize failed: {}", err),
    };
    let decoded: ScenarioDef = match serde_json::from_str(&encoded) {
        Ok(decoded) => decoded,
        Err(err) => panic!("Deserialize failed: {}", err),
    };
    assert_eq!(decoded.scenario_id, def.scenario_id);
    assert_eq!(decoded.journeys.len(), 1);
    assert_eq!(decoded.journeys[0].volume, def.journeys[0].volume);
}

#[test]
fn registry_resolves_builtins() {
    let registry = builtin_registry();
    assert!(registry.resolve("demo:http_get").is_some());
    assert!(registry.resolve("demo:url_sweep").is_some());
    assert!(registry.resolve("demo:nope").is_none());
    assert_eq!(
        registry.known(),
        vec!["demo:http_get".to_owned(), "demo:url_sweep".to_owned()]
    );
}

struct CountingJourney {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Journey for CountingJourney {
    async fn execute(&self, _row: Option<Row>, _ctx: &JourneyContext) -> Result<(), JourneyFailure> {
        self.runs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

struct SleepyJourney;

#[async_trait]
impl Journey for SleepyJourney {
    async fn execute(&self, _row: Option<Row>, ctx: &JourneyContext) -> Result<(), JourneyFailure> {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
            () = ctx.cancelled() => {}
        }
        Ok(())
    }
}

struct PacerHarness {
    registry: Arc<PeerRegistry>,
    metrics: Metrics,
    config: Arc<NodeConfig>,
    pool: Arc<Semaphore>,
}

fn harness(pool_size: usize) -> PacerHarness {
    let local = NodeInfo::new("127.0.0.1".to_owned(), 42042);
    let config = Arc::new(NodeConfig::default());
    PacerHarness {
        registry: Arc::new(PeerRegistry::new(
            local,
            config.max_peers,
            config.quarantine,
            config.suspect_to_dead,
        )),
        metrics: Arc::new(MetricsRegistry::new(NodeIdentity::generate(), 64)),
        config,
        pool: Arc::new(Semaphore::new(pool_size)),
    }
}

fn pacer_spec(
    harness: &PacerHarness,
    journey: Arc<dyn Journey>,
    model: VolumeModel,
) -> PacerSpec {
    PacerSpec {
        journey,
        journey_name: "pulse".to_owned(),
        scenario_label: "test:pulse".to_owned(),
        volume: model,
        datapool: None,
        pool: Arc::clone(&harness.pool),
        registry: Arc::clone(&harness.registry),
        metrics: Arc::clone(&harness.metrics),
        config: Arc::clone(&harness.config),
        http: reqwest::Client::new(),
        start_delay: Duration::ZERO,
    }
}

async fn wait_for_state(handle: &PacerHandle, state: PacerState) {
    let mut rx = handle.state_receiver();
    loop {
        if *rx.borrow() == state {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn pacer_launches_at_the_configured_rate() {
    let harness = harness(1024);
    let runs = Arc::new(AtomicUsize::new(0));
    let journey = Arc::new(CountingJourney {
        runs: Arc::clone(&runs),
    });
    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    let handle = spawn_pacer(pacer_spec(&harness, journey, volume(50.0, 2.0, 0.0)), shutdown_rx);
    wait_for_state(&handle, PacerState::Stopped).await;
    drop(shutdown_tx);

    // 50 rps for 2 s, minus the empty first tick.
    let launched = runs.load(Ordering::Relaxed);
    assert!(
        (90..=105).contains(&launched),
        "launched {} journeys",
        launched
    );
}

#[tokio::test(start_paused = true)]
async fn saturated_pool_drops_launches_and_counts_them() {
    let harness = harness(2);
    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let handle = spawn_pacer(
        pacer_spec(&harness, Arc::new(SleepyJourney), volume(50.0, 1.0, 0.0)),
        shutdown_rx,
    );
    wait_for_state(&handle, PacerState::Stopped).await;
    drop(shutdown_tx);

    let dropped = harness
        .metrics
        .counter_family_total("journey_backpressure_total");
    // Two slots fill instantly; everything after is dropped.
    assert!(dropped >= 30, "only {} drops recorded", dropped);
    // The pool cap held: never more than 2 in flight.
    assert_eq!(harness.pool.available_permits(), 2);
}

#[tokio::test(start_paused = true)]
async fn drain_request_stops_the_pacer_within_the_timeout() {
    let harness = harness(64);
    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let handle = spawn_pacer(
        pacer_spec(&harness, Arc::new(SleepyJourney), volume(10.0, 3600.0, 0.0)),
        shutdown_rx,
    );
    wait_for_state(&handle, PacerState::Running).await;

    let drained_at = tokio::time::Instant::now();
    handle.request_drain();
    wait_for_state(&handle, PacerState::Stopped).await;
    drop(shutdown_tx);

    let elapsed = drained_at.elapsed();
    let bound = harness.config.drain_timeout + 2 * harness.config.tick;
    assert!(elapsed <= bound, "drain took {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn start_delay_defers_the_first_launch() {
    let harness = harness(64);
    let runs = Arc::new(AtomicUsize::new(0));
    let journey = Arc::new(CountingJourney {
        runs: Arc::clone(&runs),
    });
    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let mut spec = pacer_spec(&harness, journey, volume(10.0, 1.0, 0.0));
    spec.start_delay = Duration::from_secs(2);
    let handle = spawn_pacer(spec, shutdown_rx);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(runs.load(Ordering::Relaxed), 0);
    assert_eq!(handle.state(), PacerState::Scheduled);

    wait_for_state(&handle, PacerState::Stopped).await;
    drop(shutdown_tx);
    let launched = runs.load(Ordering::Relaxed);
    assert!((5..=12).contains(&launched), "launched {}", launched);
}
