//! Cluster membership: node identity, the peer registry and liveness probing.
mod identity;
mod liveness;
mod registry;


pub use identity::{epoch_ms, NodeIdentity, NodeInfo};
pub use liveness::spawn_liveness;
pub use registry::{PeerRegistry, PeerState, PeerView};
