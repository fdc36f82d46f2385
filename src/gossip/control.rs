use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cluster::NodeIdentity;
use crate::scenario::{ScenarioDef, ScenarioId};
use crate::transport::RequesterInfo;

/// Identifies one control message: origin node plus a per-origin
/// monotonic sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MsgId {
    pub origin: NodeIdentity,
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlPayload {
    ScenarioStart { scenario: ScenarioDef },
    ScenarioStop { scenario_id: ScenarioId },
    SnapshotPing { request: RequesterPing },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequesterPing {
    pub request_id: String,
    pub requester: RequesterInfo,
}

/// Hop-limited flooding envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlEnvelope {
    pub msg_id: MsgId,
    pub hops_remaining: u32,
    pub payload: ControlPayload,
}

/// Dedup window for control messages: bounded LRU with a retention horizon.
#[derive(Debug)]
pub struct RecentSet {
    capacity: usize,
    retention: Duration,
    seen: HashSet<MsgId>,
    order: VecDeque<(MsgId, Instant)>,
}

impl RecentSet {
    #[must_use]
    pub fn new(capacity: usize, retention: Duration) -> Self {
        RecentSet {
            capacity,
            retention,
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record a message id. Returns true when it was not seen before
    /// (within capacity and retention).
    pub fn observe(&mut self, id: MsgId) -> bool {
        self.evict(Instant::now());
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back((id, Instant::now()));
        true
    }

    fn evict(&mut self, now: Instant) {
        while let Some((id, at)) = self.order.front().copied() {
            let expired = now.duration_since(at) >= self.retention;
            if expired || self.order.len() > self.capacity {
                self.order.pop_front();
                self.seen.remove(&id);
            } else {
                break;
            }
        }
        while self.order.len() > self.capacity {
            if let Some((id, _)) = self.order.pop_front() {
                self.seen.remove(&id);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
