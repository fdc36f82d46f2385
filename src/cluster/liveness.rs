use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

use crate::config::NodeConfig;
use crate::shutdown::ShutdownReceiver;
use crate::transport::Transport;

use super::registry::PeerRegistry;

/// Periodic liveness probing: every `ping_interval`, PING each ALIVE or
/// SUSPECT peer and apply the outcome to the registry. Also runs the
/// SUSPECT-to-DEAD sweep.
pub fn spawn_liveness(
    registry: Arc<PeerRegistry>,
    transport: Transport,
    config: Arc<NodeConfig>,
    mut shutdown: ShutdownReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }
            registry.sweep();
            for peer in registry.probe_targets() {
                let registry = Arc::clone(&registry);
                let transport = transport.clone();
                let ping_timeout = config.ping_timeout;
                tokio::spawn(async move {
                    probe_peer(&registry, &transport, peer.identity, ping_timeout).await;
                });
            }
        }
    })
}

async fn probe_peer(
    registry: &PeerRegistry,
    transport: &Transport,
    peer: crate::cluster::NodeIdentity,
    ping_timeout: Duration,
) {
    match tokio::time::timeout(ping_timeout, transport.ping(peer)).await {
        Ok(Ok(())) => {
            trace!("PONG from {}", peer.short());
            registry.record_pong(peer);
        }
        Ok(Err(err)) => {
            trace!("Ping to {} failed: {}", peer.short(), err);
            registry.record_ping_timeout(peer);
        }
        Err(_) => {
            trace!("Ping to {} timed out", peer.short());
            registry.record_ping_timeout(peer);
        }
    }
}
