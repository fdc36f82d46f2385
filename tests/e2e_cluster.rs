//! End-to-end membership and aggregation behavior across real loopback nodes.
mod support_cluster;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use support_cluster::{
    bootstrap_to, fast_config, pulse_registry, start_node, wait_until,
};

use ironswarm::cluster::PeerState;
use ironswarm::error::AppResult;

fn counting_registry() -> (Arc<AtomicUsize>, ironswarm::scenario::ScenarioRegistry) {
    let runs = Arc::new(AtomicUsize::new(0));
    let registry = pulse_registry(Arc::clone(&runs), 20.0, 2.0, None);
    (runs, registry)
}

#[tokio::test]
async fn two_node_rendezvous() -> AppResult<()> {
    let (_, registry_a) = counting_registry();
    let (_, registry_b) = counting_registry();
    let a = start_node(Vec::new(), fast_config(), registry_a).await?;
    let b = start_node(bootstrap_to(&a.node), fast_config(), registry_b).await?;

    let api_a = a.node.api();
    let api_b = b.node.api();
    let converged = wait_until(Duration::from_secs(10), || {
        let a_sees_b = api_a
            .get_cluster()
            .peers
            .iter()
            .any(|peer| peer.identity == b.node.identity() && peer.state == PeerState::Alive);
        let b_sees_a = api_b
            .get_cluster()
            .peers
            .iter()
            .any(|peer| peer.identity == a.node.identity() && peer.state == PeerState::Alive);
        a_sees_b && b_sees_a
    })
    .await;
    assert!(converged, "nodes did not rendezvous within 10s");

    b.shutdown().await?;
    a.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn third_node_is_learned_through_gossip() -> AppResult<()> {
    let (_, registry_a) = counting_registry();
    let (_, registry_b) = counting_registry();
    let (_, registry_c) = counting_registry();
    let a = start_node(Vec::new(), fast_config(), registry_a).await?;
    // B and C both bootstrap only to A; they must discover each other.
    let b = start_node(bootstrap_to(&a.node), fast_config(), registry_b).await?;
    let c = start_node(bootstrap_to(&a.node), fast_config(), registry_c).await?;

    let api_b = b.node.api();
    let c_identity = c.node.identity();
    let learned = wait_until(Duration::from_secs(10), || {
        api_b
            .get_cluster()
            .peers
            .iter()
            .any(|peer| peer.identity == c_identity && peer.state == PeerState::Alive)
    })
    .await;
    assert!(learned, "B never learned C through gossip");

    c.shutdown().await?;
    b.shutdown().await?;
    a.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn gossiped_scenario_start_reaches_the_peer_and_is_idempotent() -> AppResult<()> {
    let (_runs_a, registry_a) = counting_registry();
    let (_runs_b, registry_b) = counting_registry();
    let a = start_node(Vec::new(), fast_config(), registry_a).await?;
    let b = start_node(bootstrap_to(&a.node), fast_config(), registry_b).await?;

    let api_a = a.node.api();
    let api_b = b.node.api();
    let converged = wait_until(Duration::from_secs(10), || {
        !api_a.get_cluster().peers.is_empty() && !api_b.get_cluster().peers.is_empty()
    })
    .await;
    assert!(converged);

    let id = api_a.start_scenario("test:pulse").await?;
    let propagated = wait_until(Duration::from_secs(10), || {
        api_b.list_scenarios().iter().any(|status| status.id == id)
    })
    .await;
    assert!(propagated, "scenario start never reached B");

    // However many times the start is replayed, one scenario exists per id.
    assert_eq!(
        api_a
            .list_scenarios()
            .iter()
            .filter(|status| status.id == id)
            .count(),
        1
    );
    assert_eq!(
        api_b
            .list_scenarios()
            .iter()
            .filter(|status| status.id == id)
            .count(),
        1
    );

    // Stop from A; B drains too.
    api_a.stop_scenario(id).await;
    let stopped = wait_until(Duration::from_secs(10), || {
        api_b.list_scenarios().iter().all(|status| status.id != id)
            && api_a.list_scenarios().iter().all(|status| status.id != id)
    })
    .await;
    assert!(stopped, "scenario did not stop cluster-wide");

    b.shutdown().await?;
    a.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn cluster_snapshot_merges_peer_counters() -> AppResult<()> {
    let (runs_a, registry_a) = counting_registry();
    let (runs_b, registry_b) = counting_registry();
    let _ = (&runs_a, &runs_b);
    let a = start_node(Vec::new(), fast_config(), registry_a).await?;
    let b = start_node(bootstrap_to(&a.node), fast_config(), registry_b).await?;

    let api_a = a.node.api();
    let api_b = b.node.api();
    let converged = wait_until(Duration::from_secs(10), || {
        !api_a.get_cluster().peers.is_empty() && !api_b.get_cluster().peers.is_empty()
    })
    .await;
    assert!(converged);

    // Run a short scenario everywhere, then wait for both sides to finish.
    let id = api_a.start_scenario("test:pulse").await?;
    let done = wait_until(Duration::from_secs(15), || {
        api_a.list_scenarios().iter().all(|status| status.id != id)
            && api_b.list_scenarios().iter().all(|status| status.id != id)
    })
    .await;
    assert!(done, "scenario did not complete on both nodes");

    let local_a = api_a
        .get_metrics(ironswarm::node::MetricsScope::Local)
        .await?
        .counter_total("journey_executions_total");
    let local_b = api_b
        .get_metrics(ironswarm::node::MetricsScope::Local)
        .await?
        .counter_total("journey_executions_total");
    assert!(local_a > 0, "A executed no journeys");
    assert!(local_b > 0, "B executed no journeys");

    let outcome = api_a.get_cluster_metrics().await?;
    assert!(!outcome.partial, "missing: {:?}", outcome.missing);
    assert_eq!(
        outcome.snapshot.counter_total("journey_executions_total"),
        local_a + local_b
    );

    b.shutdown().await?;
    a.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn unreachable_peer_yields_a_partial_snapshot() -> AppResult<()> {
    let (_, registry_a) = counting_registry();
    let (_, registry_b) = counting_registry();
    let a = start_node(Vec::new(), fast_config(), registry_a).await?;
    let b = start_node(bootstrap_to(&a.node), fast_config(), registry_b).await?;

    let api_a = a.node.api();
    let converged = wait_until(Duration::from_secs(10), || {
        !api_a.get_cluster().peers.is_empty()
    })
    .await;
    assert!(converged);

    // Kill B without a BYE: its record stays ALIVE on A for a while, so the
    // aggregate must come back partial, within the deadline, naming B.
    let b_identity = b.node.identity();
    b.runner.abort();
    drop(b.node);

    let started = std::time::Instant::now();
    let outcome = api_a.get_cluster_metrics().await?;
    assert!(started.elapsed() < Duration::from_millis(2500));
    if outcome.partial {
        assert_eq!(outcome.missing, vec![b_identity]);
    }

    a.shutdown().await?;
    Ok(())
}
