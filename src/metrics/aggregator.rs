use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::cluster::NodeIdentity;

use super::snapshot::{merge_snapshots, Snapshot};

pub type SnapshotRequestId = String;

#[derive(Debug)]
pub struct AggregateOutcome {
    pub snapshot: Snapshot,
    /// True when at least one expected peer did not respond in time.
    pub partial: bool,
    pub missing: Vec<NodeIdentity>,
    pub responders: usize,
}

/// Fan-in side of cluster snapshot collection. The node layer fans the
/// request out (direct SNAPSHOT_REQ plus a gossiped ping) and routes
/// SNAPSHOT_RESP frames back here by request id.
#[derive(Clone, Default)]
pub struct Aggregator {
    pending: Arc<Mutex<HashMap<SnapshotRequestId, mpsc::Sender<Snapshot>>>>,
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        Aggregator::default()
    }

    #[must_use]
    pub fn new_request_id() -> SnapshotRequestId {
        format!("{:032x}", rand::thread_rng().gen::<u128>())
    }

    /// Open a collection slot for `request_id` and return the response
    /// stream.
    pub fn register(&self, request_id: &str) -> mpsc::Receiver<Snapshot> {
        let (tx, rx) = mpsc::channel(256);
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.insert(request_id.to_owned(), tx);
        rx
    }

    /// Route one peer response. Late or unknown request ids are dropped.
    pub fn handle_response(&self, request_id: &str, snapshot: Snapshot) {
        let sender = {
            let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.get(request_id).cloned()
        };
        match sender {
            Some(sender) => {
                if sender.try_send(snapshot).is_err() {
                    trace!("Snapshot response channel full for {}", request_id);
                }
            }
            None => trace!("Late snapshot response for {}", request_id),
        }
    }

    /// Merge responses as they arrive until every expected peer answered or
    /// the deadline passes. `receiver` is the stream returned by `register`
    /// for the same request id. Always returns at the deadline; the outcome
    /// is flagged partial with the non-responders listed. Never retried.
    pub async fn collect(
        &self,
        request_id: &str,
        mut receiver: mpsc::Receiver<Snapshot>,
        local: Snapshot,
        expected: Vec<NodeIdentity>,
        timeout: Duration,
    ) -> AggregateOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        let expected_set: HashSet<NodeIdentity> = expected.iter().copied().collect();
        let mut responded: HashSet<NodeIdentity> = HashSet::new();
        let mut merged = local;

        while responded.len() < expected_set.len() {
            let next = tokio::time::timeout_at(deadline, receiver.recv()).await;
            match next {
                Ok(Some(snapshot)) => {
                    let from = snapshot.node_identity;
                    if expected_set.contains(&from) && responded.insert(from) {
                        merged = merge_snapshots(&merged, &snapshot);
                    } else {
                        trace!("Ignoring unexpected snapshot from {}", from.short());
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(
                        "Snapshot deadline hit for {} ({}/{} responses)",
                        request_id,
                        responded.len(),
                        expected_set.len()
                    );
                    break;
                }
            }
        }

        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(request_id);
        }

        let mut missing: Vec<NodeIdentity> = expected_set
            .iter()
            .filter(|identity| !responded.contains(identity))
            .copied()
            .collect();
        missing.sort();
        AggregateOutcome {
            snapshot: merged,
            partial: !missing.is_empty(),
            missing,
            responders: responded.len(),
        }
    }
}
