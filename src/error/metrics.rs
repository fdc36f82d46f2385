use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to write snapshot to {path}: {source}")]
    SnapshotWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Snapshot serialization failed: {source}")]
    SnapshotEncode {
        #[source]
        source: serde_json::Error,
    },
    // Invariant break detected while freezing the registries. Fatal: the
    // process must not keep reporting corrupt numbers.
    #[error("Metrics registry corrupted: {detail}")]
    RegistryCorrupted { detail: &'static str },
}
