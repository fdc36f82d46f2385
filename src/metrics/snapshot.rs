use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cluster::NodeIdentity;

use super::registry::Labels;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSample {
    pub name: String,
    pub labels: Labels,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSample {
    pub name: String,
    pub labels: Labels,
    /// Sorted bucket bounds; `bucket_counts` has one extra slot for +Inf.
    pub bounds: Vec<f64>,
    pub bucket_counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSample {
    pub timestamp_ms: u64,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventStream {
    pub name: String,
    pub capacity: usize,
    pub samples: Vec<EventSample>,
}

/// A consistent-per-node image of the metrics registries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub node_identity: NodeIdentity,
    pub captured_at_ms: u64,
    pub counters: Vec<CounterSample>,
    pub histograms: Vec<HistogramSample>,
    pub events: Vec<EventStream>,
}

impl Snapshot {
    /// Deterministic series order so merged snapshots compare equal
    /// regardless of merge order.
    pub fn sort_series(&mut self) {
        self.counters
            .sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));
        self.histograms
            .sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));
        self.events.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Total across one counter family, any labels.
    #[must_use]
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .filter(|sample| sample.name == name)
            .map(|sample| sample.value)
            .sum()
    }
}

type SeriesKey = (String, Labels);

/// Merge two snapshots into a cluster-wide view.
///
/// Counters add, histograms sum bucket-wise, event streams concatenate in
/// timestamp order and keep the newest samples up to the larger capacity.
/// The operation is associative and commutative; `node_identity` and
/// `captured_at_ms` of the later capture win.
#[must_use]
pub fn merge_snapshots(a: &Snapshot, b: &Snapshot) -> Snapshot {
    let mut counters: BTreeMap<SeriesKey, u64> = BTreeMap::new();
    for sample in a.counters.iter().chain(b.counters.iter()) {
        *counters
            .entry((sample.name.clone(), sample.labels.clone()))
            .or_insert(0) += sample.value;
    }

    let mut histograms: BTreeMap<SeriesKey, HistogramSample> = BTreeMap::new();
    for sample in a.histograms.iter().chain(b.histograms.iter()) {
        let key = (sample.name.clone(), sample.labels.clone());
        match histograms.get_mut(&key) {
            None => {
                histograms.insert(key, sample.clone());
            }
            Some(merged) if merged.bounds == sample.bounds => {
                for (slot, add) in merged
                    .bucket_counts
                    .iter_mut()
                    .zip(sample.bucket_counts.iter())
                {
                    *slot += add;
                }
                merged.sum += sample.sum;
                merged.count += sample.count;
            }
            Some(merged) => {
                // Bound sets are fixed process-wide; a mismatch means one
                // side is from an incompatible build. Keep the larger series.
                if sample.count > merged.count {
                    *merged = sample.clone();
                }
            }
        }
    }

    let mut events: BTreeMap<String, EventStream> = BTreeMap::new();
    for stream in a.events.iter().chain(b.events.iter()) {
        match events.get_mut(&stream.name) {
            None => {
                events.insert(stream.name.clone(), stream.clone());
            }
            Some(merged) => {
                merged.capacity = merged.capacity.max(stream.capacity);
                merged.samples.extend(stream.samples.iter().cloned());
            }
        }
    }
    let events: Vec<EventStream> = events
        .into_values()
        .map(|mut stream| {
            stream
                .samples
                .sort_by(|x, y| match x.timestamp_ms.cmp(&y.timestamp_ms) {
                    std::cmp::Ordering::Equal => {
                        x.payload.to_string().cmp(&y.payload.to_string())
                    }
                    other => other,
                });
            let keep = stream.samples.len().min(stream.capacity);
            let drop = stream.samples.len() - keep;
            stream.samples.drain(..drop);
            stream
        })
        .collect();

    let (identity, captured_at_ms) = if b.captured_at_ms >= a.captured_at_ms {
        (b.node_identity, b.captured_at_ms)
    } else {
        (a.node_identity, a.captured_at_ms)
    };

    let mut merged = Snapshot {
        node_identity: identity,
        captured_at_ms,
        counters: counters
            .into_iter()
            .map(|((name, labels), value)| CounterSample {
                name,
                labels,
                value,
            })
            .collect(),
        histograms: histograms.into_values().collect(),
        events,
    };
    merged.sort_series();
    merged
}
