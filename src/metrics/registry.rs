use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::cluster::{epoch_ms, NodeIdentity};
use crate::error::{AppError, AppResult, MetricsError};

use super::snapshot::{CounterSample, EventSample, EventStream, HistogramSample, Snapshot};

/// Exponential bucket bounds for request latencies, in seconds. The +Inf
/// bucket is implicit (one more count slot than bounds).
pub const DEFAULT_LATENCY_BOUNDS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

pub type Labels = BTreeMap<String, String>;

/// Build a label map from `(key, value)` pairs.
#[must_use]
pub fn labels<const N: usize>(pairs: [(&str, &str); N]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: String,
    labels: Labels,
}

/// Atomic f64 accumulator for histogram sums.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        AtomicF64(AtomicU64::new(value.to_bits()))
    }

    fn add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct HistogramCore {
    bounds: Arc<[f64]>,
    // bounds.len() + 1 slots; the last one is +Inf
    bucket_counts: Vec<AtomicU64>,
    sum: AtomicF64,
    count: AtomicU64,
}

impl HistogramCore {
    fn new(bounds: Arc<[f64]>) -> Self {
        let bucket_counts = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        HistogramCore {
            bounds,
            bucket_counts,
            sum: AtomicF64::new(0.0),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.bounds.len());
        self.bucket_counts[idx].fetch_add(1, Ordering::Relaxed);
        self.sum.add(value);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct EventRing {
    capacity: usize,
    samples: VecDeque<EventSample>,
}

impl EventRing {
    fn record(&mut self, sample: EventSample) {
        if self.capacity == 0 {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }
}

/// Registries keyed by `(name, canonical labels)`. Writes are O(1) after the
/// first insert for a series; registry growth takes a write lock, hot-path
/// updates touch only the per-series atomics.
#[derive(Debug)]
pub struct MetricsRegistry {
    identity: NodeIdentity,
    bounds: Arc<[f64]>,
    event_capacity: usize,
    counters: RwLock<HashMap<SeriesKey, Arc<AtomicU64>>>,
    histograms: RwLock<HashMap<SeriesKey, Arc<HistogramCore>>>,
    events: RwLock<HashMap<String, Arc<Mutex<EventRing>>>>,
}

impl MetricsRegistry {
    #[must_use]
    pub fn new(identity: NodeIdentity, event_capacity: usize) -> Self {
        MetricsRegistry {
            identity,
            bounds: Arc::from(DEFAULT_LATENCY_BOUNDS.as_slice()),
            event_capacity,
            counters: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
        }
    }

    fn counter(&self, name: &str, labels: &Labels) -> Arc<AtomicU64> {
        let key = SeriesKey {
            name: name.to_owned(),
            labels: labels.clone(),
        };
        {
            let read = self.counters.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cell) = read.get(&key) {
                return Arc::clone(cell);
            }
        }
        let mut write = self.counters.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(write.entry(key).or_insert_with(|| Arc::new(AtomicU64::new(0))))
    }

    fn histogram(&self, name: &str, labels: &Labels) -> Arc<HistogramCore> {
        let key = SeriesKey {
            name: name.to_owned(),
            labels: labels.clone(),
        };
        {
            let read = self.histograms.read().unwrap_or_else(|e| e.into_inner());
            if let Some(core) = read.get(&key) {
                return Arc::clone(core);
            }
        }
        let mut write = self.histograms.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            write
                .entry(key)
                .or_insert_with(|| Arc::new(HistogramCore::new(Arc::clone(&self.bounds)))),
        )
    }

    pub fn inc(&self, name: &str, labels: &Labels) {
        self.inc_by(name, labels, 1);
    }

    pub fn inc_by(&self, name: &str, labels: &Labels, amount: u64) {
        self.counter(name, labels).fetch_add(amount, Ordering::Relaxed);
    }

    /// Observe a latency (seconds) into the named histogram series.
    pub fn observe(&self, name: &str, labels: &Labels, value: f64) {
        self.histogram(name, labels).observe(value);
    }

    /// Append a timestamped sample to the named event stream.
    pub fn record_event(&self, name: &str, payload: serde_json::Value) {
        let ring = {
            let read = self.events.read().unwrap_or_else(|e| e.into_inner());
            read.get(name).map(Arc::clone)
        };
        let ring = match ring {
            Some(ring) => ring,
            None => {
                let mut write = self.events.write().unwrap_or_else(|e| e.into_inner());
                Arc::clone(write.entry(name.to_owned()).or_insert_with(|| {
                    Arc::new(Mutex::new(EventRing {
                        capacity: self.event_capacity,
                        samples: VecDeque::new(),
                    }))
                }))
            }
        };
        let sample = EventSample {
            timestamp_ms: epoch_ms(),
            payload,
        };
        ring.lock().unwrap_or_else(|e| e.into_inner()).record(sample);
    }

    /// Read one counter value; mostly useful in tests and the stats line.
    #[must_use]
    pub fn counter_value(&self, name: &str, labels: &Labels) -> u64 {
        let key = SeriesKey {
            name: name.to_owned(),
            labels: labels.clone(),
        };
        let read = self.counters.read().unwrap_or_else(|e| e.into_inner());
        read.get(&key).map_or(0, |cell| cell.load(Ordering::Relaxed))
    }

    /// Sum of one counter family across all label sets.
    #[must_use]
    pub fn counter_family_total(&self, name: &str) -> u64 {
        let read = self.counters.read().unwrap_or_else(|e| e.into_inner());
        read.iter()
            .filter(|(key, _)| key.name == name)
            .map(|(_, cell)| cell.load(Ordering::Relaxed))
            .sum()
    }

    /// Freeze a consistent-per-series copy of all registries.
    ///
    /// Writers are never blocked globally; each series is copied atomically.
    /// Histograms are captured before counters so the running-total invariant
    /// (a counter incremented before its histogram observation) survives
    /// concurrent writes.
    ///
    /// # Errors
    ///
    /// Returns an error if a series fails its structural invariant
    /// (`count == sum(bucket_counts)` cannot regress); that signals registry
    /// corruption and is fatal upstream.
    pub fn snapshot(&self) -> AppResult<Snapshot> {
        let mut histograms: Vec<HistogramSample> = {
            let read = self.histograms.read().unwrap_or_else(|e| e.into_inner());
            read.iter()
                .map(|(key, core)| HistogramSample {
                    name: key.name.clone(),
                    labels: key.labels.clone(),
                    bounds: core.bounds.to_vec(),
                    bucket_counts: core
                        .bucket_counts
                        .iter()
                        .map(|cell| cell.load(Ordering::Relaxed))
                        .collect(),
                    sum: core.sum.get(),
                    count: 0,
                })
                .collect()
        };
        for sample in &mut histograms {
            if sample.bucket_counts.len() != sample.bounds.len() + 1 {
                return Err(AppError::metrics(MetricsError::RegistryCorrupted {
                    detail: "bucket slots do not match the bound set",
                }));
            }
            // Derive the observation count from the frozen buckets so each
            // series is internally exact; in-flight observations fold into
            // the next snapshot.
            sample.count = sample.bucket_counts.iter().sum();
        }

        let counters: Vec<CounterSample> = {
            let read = self.counters.read().unwrap_or_else(|e| e.into_inner());
            read.iter()
                .map(|(key, cell)| CounterSample {
                    name: key.name.clone(),
                    labels: key.labels.clone(),
                    value: cell.load(Ordering::Relaxed),
                })
                .collect()
        };

        let events: Vec<EventStream> = {
            let read = self.events.read().unwrap_or_else(|e| e.into_inner());
            read.iter()
                .map(|(name, ring)| {
                    let ring = ring.lock().unwrap_or_else(|e| e.into_inner());
                    let mut samples: Vec<EventSample> = ring.samples.iter().cloned().collect();
                    samples.sort_by_key(|sample| sample.timestamp_ms);
                    EventStream {
                        name: name.clone(),
                        capacity: ring.capacity,
                        samples,
                    }
                })
                .collect()
        };

        let mut snapshot = Snapshot {
            node_identity: self.identity,
            captured_at_ms: epoch_ms(),
            counters,
            histograms,
            events,
        };
        snapshot.sort_series();
        Ok(snapshot)
    }
}
