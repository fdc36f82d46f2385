use thiserror::Error;

#[derive(Debug, Error)]
pub enum GossipError {
    #[error("Malformed gossip payload: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
    },
}
