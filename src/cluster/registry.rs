use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::identity::{epoch_ms, NodeIdentity, NodeInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Connecting,
    Alive,
    Suspect,
    Dead,
}

/// Read-only copy of one peer record, cheap to hand out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerView {
    pub identity: NodeIdentity,
    pub host: String,
    pub port: u16,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub state: PeerState,
}

#[derive(Debug)]
struct PeerEntry {
    host: String,
    port: u16,
    first_seen_ms: u64,
    last_seen_ms: u64,
    state: PeerState,
    pong_streak: u8,
    suspect_since: Option<Instant>,
    quarantined_until: Option<Instant>,
}

impl PeerEntry {
    fn view(&self, identity: NodeIdentity) -> PeerView {
        PeerView {
            identity,
            host: self.host.clone(),
            port: self.port,
            first_seen_ms: self.first_seen_ms,
            last_seen_ms: self.last_seen_ms,
            state: self.state,
        }
    }

    fn quarantined(&self, now: Instant) -> bool {
        self.quarantined_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug)]
struct Inner {
    peers: HashMap<NodeIdentity, PeerEntry>,
    // Copy-on-write alive-set including self, sorted by identity. Rebuilt on
    // every mutation so readers only clone the Arc.
    alive_cache: Arc<Vec<PeerView>>,
}

/// One record per known peer identity. Single structure, many readers; all
/// mutation goes through `&self` methods that rebuild the alive-set cache.
#[derive(Debug)]
pub struct PeerRegistry {
    local: NodeInfo,
    max_peers: usize,
    quarantine: Duration,
    suspect_to_dead: Duration,
    inner: RwLock<Inner>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new(
        local: NodeInfo,
        max_peers: usize,
        quarantine: Duration,
        suspect_to_dead: Duration,
    ) -> Self {
        let registry = PeerRegistry {
            local,
            max_peers,
            quarantine,
            suspect_to_dead,
            inner: RwLock::new(Inner {
                peers: HashMap::new(),
                alive_cache: Arc::new(Vec::new()),
            }),
        };
        registry.with_inner(|_| {});
        registry
    }

    #[must_use]
    pub fn local(&self) -> &NodeInfo {
        &self.local
    }

    fn self_view(&self) -> PeerView {
        PeerView {
            identity: self.local.identity,
            host: self.local.host.clone(),
            port: self.local.port,
            first_seen_ms: self.local.started_at_ms,
            last_seen_ms: epoch_ms(),
            state: PeerState::Alive,
        }
    }

    fn with_inner<T>(&self, apply: impl FnOnce(&mut HashMap<NodeIdentity, PeerEntry>) -> T) -> T {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let result = apply(&mut inner.peers);
        let mut alive: Vec<PeerView> = inner
            .peers
            .iter()
            .filter(|(_, entry)| entry.state == PeerState::Alive)
            .map(|(identity, entry)| entry.view(*identity))
            .collect();
        alive.push(self.self_view());
        alive.sort_by_key(|view| view.identity);
        inner.alive_cache = Arc::new(alive);
        result
    }

    /// Direct evidence of a live peer (handshake completed or frame
    /// received). Moves the record to ALIVE unless it is DEAD-quarantined.
    /// Returns false when the peer was rejected (quarantine or capacity).
    pub fn note_seen(&self, identity: NodeIdentity, host: &str, port: u16) -> bool {
        if identity == self.local.identity {
            return true;
        }
        let now = Instant::now();
        let now_ms = epoch_ms();
        let max_peers = self.max_peers;
        self.with_inner(|peers| match peers.get_mut(&identity) {
            Some(entry) => {
                if entry.quarantined(now) {
                    return false;
                }
                entry.host = host.to_owned();
                entry.port = port;
                entry.last_seen_ms = entry.last_seen_ms.max(now_ms);
                entry.state = PeerState::Alive;
                entry.pong_streak = 0;
                entry.suspect_since = None;
                entry.quarantined_until = None;
                true
            }
            None => {
                if peers.len() >= max_peers {
                    warn!("Peer limit reached ({}); ignoring {}", max_peers, identity);
                    return false;
                }
                peers.insert(
                    identity,
                    PeerEntry {
                        host: host.to_owned(),
                        port,
                        first_seen_ms: now_ms,
                        last_seen_ms: now_ms,
                        state: PeerState::Alive,
                        pong_streak: 0,
                        suspect_since: None,
                        quarantined_until: None,
                    },
                );
                true
            }
        })
    }

    /// A peer learned second-hand from gossip. Inserts a CONNECTING record
    /// when unknown; returns true if the caller should start a connection
    /// attempt.
    pub fn learn(&self, identity: NodeIdentity, host: &str, port: u16, last_seen_ms: u64) -> bool {
        if identity == self.local.identity {
            return false;
        }
        let now = Instant::now();
        let now_ms = epoch_ms();
        let max_peers = self.max_peers;
        self.with_inner(|peers| match peers.get_mut(&identity) {
            Some(_) => false,
            None => {
                if peers.len() >= max_peers {
                    return false;
                }
                peers.insert(
                    identity,
                    PeerEntry {
                        host: host.to_owned(),
                        port,
                        first_seen_ms: now_ms,
                        last_seen_ms,
                        state: PeerState::Connecting,
                        pong_streak: 0,
                        suspect_since: None,
                        quarantined_until: None,
                    },
                );
                true
            }
        })
    }

    /// Gossip merge for a known peer: `last_seen` only moves forward, state
    /// never regresses from second-hand information.
    pub fn refresh_last_seen(&self, identity: NodeIdentity, last_seen_ms: u64) {
        self.with_inner(|peers| {
            if let Some(entry) = peers.get_mut(&identity) {
                entry.last_seen_ms = entry.last_seen_ms.max(last_seen_ms);
            }
        });
    }

    pub fn mark_suspect(&self, identity: NodeIdentity) {
        if identity == self.local.identity {
            return;
        }
        self.with_inner(|peers| {
            if let Some(entry) = peers.get_mut(&identity) {
                if matches!(entry.state, PeerState::Alive | PeerState::Connecting) {
                    debug!("Peer {} -> SUSPECT", identity.short());
                    entry.state = PeerState::Suspect;
                    entry.suspect_since = Some(Instant::now());
                    entry.pong_streak = 0;
                }
            }
        });
    }

    pub fn mark_dead(&self, identity: NodeIdentity) {
        self.with_inner(|peers| {
            if let Some(entry) = peers.get_mut(&identity) {
                if entry.state != PeerState::Dead {
                    debug!("Peer {} -> DEAD", identity.short());
                    entry.state = PeerState::Dead;
                    entry.suspect_since = None;
                }
            }
        });
    }

    /// DEAD plus a hold-down: `note_seen` will not revive the peer until the
    /// quarantine expires. Used after handshake mismatches; inserts a record
    /// when the peer was unknown so repeat offenders stay out.
    pub fn quarantine_peer(&self, identity: NodeIdentity, host: &str, port: u16) {
        if identity == self.local.identity {
            return;
        }
        let until = Instant::now() + self.quarantine;
        let now_ms = epoch_ms();
        self.with_inner(|peers| {
            let entry = peers.entry(identity).or_insert_with(|| PeerEntry {
                host: host.to_owned(),
                port,
                first_seen_ms: now_ms,
                last_seen_ms: now_ms,
                state: PeerState::Dead,
                pong_streak: 0,
                suspect_since: None,
                quarantined_until: None,
            });
            entry.state = PeerState::Dead;
            entry.suspect_since = None;
            entry.quarantined_until = Some(until);
        });
    }

    /// Successful PONG. A suspect peer needs three consecutive successes to
    /// be restored.
    pub fn record_pong(&self, identity: NodeIdentity) {
        let now_ms = epoch_ms();
        self.with_inner(|peers| {
            if let Some(entry) = peers.get_mut(&identity) {
                match entry.state {
                    PeerState::Alive => {
                        entry.last_seen_ms = entry.last_seen_ms.max(now_ms);
                    }
                    PeerState::Suspect => {
                        entry.pong_streak = entry.pong_streak.saturating_add(1);
                        entry.last_seen_ms = entry.last_seen_ms.max(now_ms);
                        if entry.pong_streak >= 3 {
                            debug!("Peer {} restored to ALIVE", identity.short());
                            entry.state = PeerState::Alive;
                            entry.pong_streak = 0;
                            entry.suspect_since = None;
                        }
                    }
                    PeerState::Connecting | PeerState::Dead => {}
                }
            }
        });
    }

    pub fn record_ping_timeout(&self, identity: NodeIdentity) {
        self.with_inner(|peers| {
            if let Some(entry) = peers.get_mut(&identity) {
                entry.pong_streak = 0;
                if matches!(entry.state, PeerState::Alive | PeerState::Connecting) {
                    debug!("Peer {} missed PONG -> SUSPECT", identity.short());
                    entry.state = PeerState::Suspect;
                    entry.suspect_since = Some(Instant::now());
                }
            }
        });
    }

    /// Periodic state maintenance: SUSPECT peers past the recovery window go
    /// DEAD, expired quarantines are lifted (the record stays DEAD until
    /// direct evidence revives it).
    pub fn sweep(&self) {
        let now = Instant::now();
        let suspect_to_dead = self.suspect_to_dead;
        self.with_inner(|peers| {
            for (identity, entry) in peers.iter_mut() {
                if entry.state == PeerState::Suspect {
                    let expired = entry
                        .suspect_since
                        .is_some_and(|since| now.duration_since(since) >= suspect_to_dead);
                    if expired {
                        debug!("Peer {} suspect timeout -> DEAD", identity.short());
                        entry.state = PeerState::Dead;
                        entry.suspect_since = None;
                    }
                }
                if entry.quarantined_until.is_some_and(|until| until <= now) {
                    entry.quarantined_until = None;
                }
            }
        });
    }

    /// Stable alive-set including self, sorted by identity. Wait-free for
    /// readers: this only clones an Arc.
    #[must_use]
    pub fn alive_snapshot(&self) -> Arc<Vec<PeerView>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&inner.alive_cache)
    }

    #[must_use]
    pub fn alive_len(&self) -> usize {
        self.alive_snapshot().len()
    }

    /// Alive peers excluding self; the gossip and liveness target set.
    #[must_use]
    pub fn alive_peers(&self) -> Vec<PeerView> {
        self.alive_snapshot()
            .iter()
            .filter(|view| view.identity != self.local.identity)
            .cloned()
            .collect()
    }

    /// Peers eligible for liveness probing: ALIVE and SUSPECT, excluding self.
    #[must_use]
    pub fn probe_targets(&self) -> Vec<PeerView> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .peers
            .iter()
            .filter(|(_, entry)| {
                matches!(entry.state, PeerState::Alive | PeerState::Suspect)
            })
            .map(|(identity, entry)| entry.view(*identity))
            .collect()
    }

    /// Every known record, self excluded.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerView> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<PeerView> = inner
            .peers
            .iter()
            .map(|(identity, entry)| entry.view(*identity))
            .collect();
        all.sort_by_key(|view| view.identity);
        all
    }

    #[must_use]
    pub fn addr_of(&self, identity: NodeIdentity) -> Option<(String, u16)> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .peers
            .get(&identity)
            .map(|entry| (entry.host.clone(), entry.port))
    }

    #[must_use]
    pub fn state_of(&self, identity: NodeIdentity) -> Option<PeerState> {
        if identity == self.local.identity {
            return Some(PeerState::Alive);
        }
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.peers.get(&identity).map(|entry| entry.state)
    }
}
