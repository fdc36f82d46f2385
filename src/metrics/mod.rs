//! Labeled counters, bucket histograms and bounded event streams, plus the
//! cluster-wide merge and aggregation machinery.
mod aggregator;
mod registry;
mod snapshot;

#[cfg(test)]
mod tests;

pub use aggregator::{AggregateOutcome, Aggregator, SnapshotRequestId};
pub use registry::{labels, Labels, MetricsRegistry, DEFAULT_LATENCY_BOUNDS};
pub use snapshot::{
    merge_snapshots, CounterSample, EventSample, EventStream, HistogramSample, Snapshot,
};

use std::sync::Arc;

/// Shared handle to the per-process metrics registry. A single instance per
/// process is normal but not required; tests build their own.
pub type Metrics = Arc<MetricsRegistry>;
