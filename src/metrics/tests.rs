use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::cluster::NodeIdentity;
use crate::error::AppResult;

use super::*;

fn test_registry() -> MetricsRegistry {
    MetricsRegistry::new(NodeIdentity::generate(), 8)
}

#[test]
fn counters_accumulate_per_label_set() -> AppResult<()> {
    let registry = test_registry();
    let ok = labels([("label", "login"), ("status_class", "2xx")]);
    let err = labels([("label", "login"), ("status_class", "5xx")]);
    registry.inc("http_requests_total", &ok);
    registry.inc("http_requests_total", &ok);
    registry.inc("http_requests_total", &err);

    assert_eq!(registry.counter_value("http_requests_total", &ok), 2);
    assert_eq!(registry.counter_value("http_requests_total", &err), 1);
    assert_eq!(registry.counter_family_total("http_requests_total"), 3);

    let snapshot = registry.snapshot()?;
    assert_eq!(snapshot.counter_total("http_requests_total"), 3);
    Ok(())
}

#[test]
fn histogram_buckets_follow_the_bounds() -> AppResult<()> {
    let registry = test_registry();
    let series = labels([("label", "login")]);
    registry.observe("http_request_duration_seconds", &series, 0.004);
    registry.observe("http_request_duration_seconds", &series, 0.3);
    registry.observe("http_request_duration_seconds", &series, 99.0);

    let snapshot = registry.snapshot()?;
    assert_eq!(snapshot.histograms.len(), 1);
    let sample = &snapshot.histograms[0];
    assert_eq!(sample.bounds, DEFAULT_LATENCY_BOUNDS.to_vec());
    assert_eq!(sample.bucket_counts.len(), DEFAULT_LATENCY_BOUNDS.len() + 1);
    assert_eq!(sample.count, 3);
    assert_eq!(sample.bucket_counts[0], 1);
    // 0.3 lands in the 0.5 bucket (index 6), 99.0 in +Inf.
    assert_eq!(sample.bucket_counts[6], 1);
    assert_eq!(sample.bucket_counts[DEFAULT_LATENCY_BOUNDS.len()], 1);
    assert!((sample.sum - 99.304).abs() < 1e-9);
    Ok(())
}

#[test]
fn event_ring_drops_oldest_at_capacity() -> AppResult<()> {
    let registry = test_registry();
    for idx in 0..20 {
        registry.record_event("http_request", json!({ "seq": idx }));
    }
    let snapshot = registry.snapshot()?;
    assert_eq!(snapshot.events.len(), 1);
    let stream = &snapshot.events[0];
    assert_eq!(stream.capacity, 8);
    assert_eq!(stream.samples.len(), 8);
    assert_eq!(stream.samples[0].payload, json!({ "seq": 12 }));
    assert_eq!(stream.samples[7].payload, json!({ "seq": 19 }));
    Ok(())
}

#[test]
fn request_counter_stays_ahead_of_histogram_count() -> AppResult<()> {
    // Writers increment the counter before observing the histogram, and the
    // snapshot captures histograms first.
    let registry = test_registry();
    let series = labels([("label", "login")]);
    for _ in 0..50 {
        registry.inc("http_requests_total", &series);
        registry.observe("http_request_duration_seconds", &series, 0.02);
    }
    let snapshot = registry.snapshot()?;
    let counter = snapshot.counter_total("http_requests_total");
    let hist_count = snapshot.histograms[0].count;
    assert!(counter >= hist_count);
    Ok(())
}

fn sample_snapshot(identity: u128, counter: u64, values: &[f64], events: &[(u64, u64)]) -> Snapshot {
    let registry = MetricsRegistry::new(NodeIdentity::from_raw(identity), 4);
    let series = labels([("label", "x")]);
    registry.inc_by("requests_total", &series, counter);
    for value in values {
        registry.observe("latency_seconds", &series, *value);
    }
    let mut snapshot = match registry.snapshot() {
        Ok(snapshot) => snapshot,
        Err(err) => panic!("Snapshot failed: {}", err),
    };
    // Deterministic event timestamps for the merge laws.
    snapshot.events = vec![EventStream {
        name: "samples".to_owned(),
        capacity: 4,
        samples: events
            .iter()
            .map(|(ts, seq)| EventSample {
                timestamp_ms: *ts,
                payload: json!({ "seq": seq }),
            })
            .collect(),
    }];
    snapshot
}

#[test]
fn merge_is_commutative() {
    let a = sample_snapshot(1, 5, &[0.01, 0.2], &[(10, 1), (30, 2)]);
    let b = sample_snapshot(2, 7, &[1.5], &[(20, 3)]);
    let ab = merge_snapshots(&a, &b);
    let ba = merge_snapshots(&b, &a);
    assert_eq!(ab.counters, ba.counters);
    assert_eq!(ab.histograms, ba.histograms);
    assert_eq!(ab.events, ba.events);
}

#[test]
fn merge_is_associative() {
    let a = sample_snapshot(1, 5, &[0.01], &[(10, 1), (15, 2), (50, 3)]);
    let b = sample_snapshot(2, 7, &[1.5, 2.0], &[(20, 4), (60, 5)]);
    let c = sample_snapshot(3, 11, &[0.3], &[(5, 6), (70, 7)]);

    let left = merge_snapshots(&merge_snapshots(&a, &b), &c);
    let right = merge_snapshots(&a, &merge_snapshots(&b, &c));
    assert_eq!(left.counters, right.counters);
    assert_eq!(left.histograms, right.histograms);
    assert_eq!(left.events, right.events);
}

#[test]
fn merge_adds_counters_and_buckets() {
    let a = sample_snapshot(1, 5, &[0.01], &[]);
    let b = sample_snapshot(2, 7, &[0.01, 5.5], &[]);
    let merged = merge_snapshots(&a, &b);
    assert_eq!(merged.counter_total("requests_total"), 12);
    let hist = &merged.histograms[0];
    assert_eq!(hist.count, 3);
    assert_eq!(hist.bucket_counts[1], 2);
}

#[test]
fn merge_truncates_events_to_capacity_keeping_newest() {
    let a = sample_snapshot(1, 0, &[], &[(10, 1), (20, 2), (30, 3)]);
    let b = sample_snapshot(2, 0, &[], &[(40, 4), (50, 5), (60, 6)]);
    let merged = merge_snapshots(&a, &b);
    let stream = &merged.events[0];
    assert_eq!(stream.samples.len(), 4);
    assert_eq!(stream.samples[0].timestamp_ms, 30);
    assert_eq!(stream.samples[3].timestamp_ms, 60);
}

#[test]
fn snapshot_roundtrips_through_json() -> AppResult<()> {
    let snapshot = sample_snapshot(9, 3, &[0.1], &[(10, 1)]);
    let encoded = serde_json::to_string(&snapshot)?;
    let decoded: Snapshot = serde_json::from_str(&encoded)?;
    assert_eq!(snapshot, decoded);
    Ok(())
}

#[tokio::test]
async fn aggregator_returns_partial_on_deadline() {
    let aggregator = Aggregator::new();
    let request_id = Aggregator::new_request_id();
    let receiver = aggregator.register(&request_id);

    let local = sample_snapshot(1, 5, &[], &[]);
    let peer = NodeIdentity::from_raw(2);
    let silent = NodeIdentity::from_raw(3);

    aggregator.handle_response(&request_id, sample_snapshot(2, 7, &[], &[]));

    let outcome = aggregator
        .collect(
            &request_id,
            receiver,
            local,
            vec![peer, silent],
            Duration::from_millis(100),
        )
        .await;
    assert!(outcome.partial);
    assert_eq!(outcome.responders, 1);
    assert_eq!(outcome.missing, vec![silent]);
    assert_eq!(outcome.snapshot.counter_total("requests_total"), 12);
}

#[tokio::test]
async fn aggregator_completes_early_when_all_respond() {
    let aggregator = Aggregator::new();
    let request_id = Aggregator::new_request_id();
    let receiver = aggregator.register(&request_id);

    let peer = NodeIdentity::from_raw(2);
    aggregator.handle_response(&request_id, sample_snapshot(2, 7, &[], &[]));

    let started = std::time::Instant::now();
    let outcome = aggregator
        .collect(
            &request_id,
            receiver,
            sample_snapshot(1, 1, &[], &[]),
            vec![peer],
            Duration::from_secs(5),
        )
        .await;
    assert!(!outcome.partial);
    assert_eq!(outcome.responders, 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn concurrent_writers_are_counted_exactly() -> AppResult<()> {
    let registry = Arc::new(test_registry());
    let series = labels([("label", "hot")]);
    let mut workers = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        let series = series.clone();
        workers.push(std::thread::spawn(move || {
            for _ in 0..1_000 {
                registry.inc("requests_total", &series);
                registry.observe("latency_seconds", &series, 0.01);
            }
        }));
    }
    for worker in workers {
        if worker.join().is_err() {
            panic!("Writer thread panicked");
        }
    }
    assert_eq!(registry.counter_value("requests_total", &series), 8_000);
    let snapshot = registry.snapshot()?;
    assert_eq!(snapshot.histograms[0].count, 8_000);
    Ok(())
}
