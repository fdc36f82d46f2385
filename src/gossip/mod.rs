//! Periodic peer-list exchange and hop-limited control fan-out.
mod control;


pub use control::{ControlEnvelope, ControlPayload, MsgId, RecentSet, RequesterPing};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::cluster::{epoch_ms, NodeIdentity, PeerRegistry, PeerView};
use crate::config::NodeConfig;
use crate::metrics::Metrics;
use crate::shutdown::ShutdownReceiver;
use crate::transport::{GossipPayload, Payload, PeerExchangeEntry, Transport};

struct GossipInner {
    registry: Arc<PeerRegistry>,
    transport: Transport,
    config: Arc<NodeConfig>,
    metrics: Metrics,
    recent: Mutex<RecentSet>,
    seq: AtomicU64,
}

#[derive(Clone)]
pub struct Gossip {
    inner: Arc<GossipInner>,
}

impl Gossip {
    #[must_use]
    pub fn new(
        registry: Arc<PeerRegistry>,
        transport: Transport,
        config: Arc<NodeConfig>,
        metrics: Metrics,
    ) -> Self {
        let recent = RecentSet::new(config.recent_set_capacity, config.recent_set_retention);
        Gossip {
            inner: Arc::new(GossipInner {
                registry,
                transport,
                config,
                metrics,
                recent: Mutex::new(recent),
                seq: AtomicU64::new(1),
            }),
        }
    }

    /// The periodic peer-exchange loop, jittered to [0.5x, 1.5x] of the
    /// configured interval.
    pub fn spawn_exchange_loop(&self, mut shutdown: ShutdownReceiver) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let base = inner.config.gossip_interval;
                let factor = rand::thread_rng().gen_range(0.5..=1.5);
                let sleep = base.mul_f64(factor);
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = shutdown.recv() => break,
                }
                exchange_round(&inner).await;
            }
        })
    }

    /// Merge a received peer list. Unknown peers get a CONNECTING record and
    /// a passive connection attempt; known peers only move `last_seen`
    /// forward, and only when the sender saw them recently enough.
    pub fn handle_peer_exchange(&self, from: NodeIdentity, payload: GossipPayload) {
        let inner = &self.inner;
        // The frame itself is direct evidence the sender is alive.
        if let Some((host, port)) = inner.registry.addr_of(from) {
            inner.registry.note_seen(from, &host, port);
        }

        let now_ms = epoch_ms();
        let freshness_ms =
            u64::try_from(inner.config.freshness_window.as_millis()).unwrap_or(u64::MAX);
        for entry in payload.entries {
            if entry.identity == inner.transport.local().identity {
                continue;
            }
            let newly_learned =
                inner
                    .registry
                    .learn(entry.identity, &entry.host, entry.port, entry.last_seen_ms);
            if newly_learned {
                trace!(
                    "Learned peer {} at {}:{} via gossip",
                    entry.identity.short(),
                    entry.host,
                    entry.port
                );
                let transport = inner.transport.clone();
                tokio::spawn(async move {
                    if let Err(err) = transport
                        .ensure_session_with(entry.identity, &entry.host, entry.port)
                        .await
                    {
                        trace!("Passive connect to {} failed: {}", entry.identity.short(), err);
                    }
                });
            } else if entry.last_seen_ms.saturating_add(freshness_ms) >= now_ms {
                inner
                    .registry
                    .refresh_last_seen(entry.identity, entry.last_seen_ms);
            }
        }
    }

    /// Originate a control message: apply-locally is the caller's job, this
    /// handles dedup marking and the first fan-out hop.
    pub async fn broadcast(&self, payload: ControlPayload) {
        let inner = &self.inner;
        let msg_id = MsgId {
            origin: inner.transport.local().identity,
            seq: inner.seq.fetch_add(1, Ordering::Relaxed),
        };
        {
            let mut recent = inner.recent.lock().unwrap_or_else(|e| e.into_inner());
            recent.observe(msg_id);
        }
        let envelope = ControlEnvelope {
            msg_id,
            hops_remaining: initial_hops(inner.registry.alive_len()),
            payload,
        };
        fan_out(inner, &envelope, None).await;
    }

    /// Process an incoming control envelope. Returns the payload when it is
    /// fresh and should be applied locally; duplicates return None.
    pub async fn handle_control(
        &self,
        from: NodeIdentity,
        envelope: ControlEnvelope,
    ) -> Option<ControlPayload> {
        let inner = &self.inner;
        let fresh = {
            let mut recent = inner.recent.lock().unwrap_or_else(|e| e.into_inner());
            recent.observe(envelope.msg_id)
        };
        if !fresh {
            trace!("Duplicate control message {:?}", envelope.msg_id);
            return None;
        }
        if envelope.hops_remaining > 0 {
            let forwarded = ControlEnvelope {
                msg_id: envelope.msg_id,
                hops_remaining: envelope.hops_remaining - 1,
                payload: envelope.payload.clone(),
            };
            fan_out(inner, &forwarded, Some(from)).await;
        }
        Some(envelope.payload)
    }
}

/// `ceil(log2(n_alive)) + 2`, the initial hop budget.
#[must_use]
pub fn initial_hops(n_alive: usize) -> u32 {
    let ceil_log2 = match n_alive {
        0 | 1 => 0,
        n => usize::BITS - (n - 1).leading_zeros(),
    };
    ceil_log2 + 2
}

fn pick_targets(inner: &GossipInner, exclude: Option<NodeIdentity>) -> Vec<PeerView> {
    let peers: Vec<PeerView> = inner
        .registry
        .alive_peers()
        .into_iter()
        .filter(|peer| Some(peer.identity) != exclude)
        .collect();
    let mut rng = rand::thread_rng();
    peers
        .choose_multiple(&mut rng, inner.config.fanout)
        .cloned()
        .collect()
}

async fn exchange_round(inner: &Arc<GossipInner>) {
    let alive = inner.registry.alive_snapshot();
    let entries: Vec<PeerExchangeEntry> = alive
        .iter()
        .map(|peer| PeerExchangeEntry {
            identity: peer.identity,
            host: peer.host.clone(),
            port: peer.port,
            last_seen_ms: peer.last_seen_ms,
        })
        .collect();
    if entries.is_empty() {
        return;
    }
    for target in pick_targets(inner, None) {
        let payload = Payload::Gossip(GossipPayload {
            entries: entries.clone(),
        });
        if let Err(err) = inner.transport.send(target.identity, payload).await {
            trace!("Gossip to {} failed: {}", target.identity.short(), err);
        }
    }
}

async fn fan_out(inner: &Arc<GossipInner>, envelope: &ControlEnvelope, exclude: Option<NodeIdentity>) {
    let targets = pick_targets(inner, exclude);
    if targets.is_empty() {
        debug!("No gossip targets for control message {:?}", envelope.msg_id);
        return;
    }
    for target in targets {
        let payload = Payload::Control(envelope.clone());
        if let Err(err) = inner.transport.send(target.identity, payload).await {
            debug!(
                "Control fan-out to {} failed: {}",
                target.identity.short(),
                err
            );
            inner
                .metrics
                .inc("gossip_control_send_failures_total", &crate::metrics::labels([]));
        }
    }
}
