//! Length-prefixed framed TCP transport with one lazily-established session
//! per peer. Peers are addressed by identity; the registry supplies the
//! mapping to socket addresses.
mod backoff;
mod frame;
mod session;

#[cfg(test)]
mod tests;

pub use frame::{
    read_frame, write_frame, FrameKind, GossipPayload, HelloPayload, Payload, PeerExchangeEntry,
    RequesterInfo, SnapshotRequest, SnapshotResponse, FEATURE_FRAMES_V1, PROTOCOL_VERSION_MAJOR,
    PROTOCOL_VERSION_MINOR,
};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::cluster::{NodeIdentity, NodeInfo, PeerRegistry};
use crate::config::NodeConfig;
use crate::error::{AppError, AppResult, TransportError};
use crate::metrics::{labels, Metrics};
use crate::shutdown::ShutdownSender;

use backoff::Backoff;
use session::SessionHandle;

/// A frame delivered to the node dispatcher (GOSSIP, CONTROL, SNAPSHOT_*).
/// PING/PONG/BYE are consumed inside the session.
#[derive(Debug)]
pub struct InboundFrame {
    pub from: NodeIdentity,
    pub payload: Payload,
}

pub(crate) struct TransportInner {
    local: NodeInfo,
    config: Arc<NodeConfig>,
    registry: Arc<PeerRegistry>,
    metrics: Metrics,
    sessions: Mutex<HashMap<NodeIdentity, SessionHandle>>,
    reconnecting: Mutex<HashSet<NodeIdentity>>,
    pending_pongs: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    ping_nonce: AtomicU64,
    inbound_tx: mpsc::Sender<InboundFrame>,
    shutdown: ShutdownSender,
}

#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    /// Take ownership of a bound listener and start the accept loop.
    /// Returns the transport handle and the inbound frame stream.
    pub fn start(
        listener: TcpListener,
        local: NodeInfo,
        config: Arc<NodeConfig>,
        registry: Arc<PeerRegistry>,
        metrics: Metrics,
        shutdown: ShutdownSender,
    ) -> (Self, mpsc::Receiver<InboundFrame>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.session_queue_capacity);
        let inner = Arc::new(TransportInner {
            local,
            config,
            registry,
            metrics,
            sessions: Mutex::new(HashMap::new()),
            reconnecting: Mutex::new(HashSet::new()),
            pending_pongs: Mutex::new(HashMap::new()),
            ping_nonce: AtomicU64::new(1),
            inbound_tx,
            shutdown,
        });
        spawn_accept_loop(Arc::clone(&inner), listener);
        (Transport { inner }, inbound_rx)
    }

    #[must_use]
    pub fn local(&self) -> &NodeInfo {
        &self.inner.local
    }

    /// Dial an explicit address (bootstrap path).
    ///
    /// # Errors
    ///
    /// Returns an error when the connection or handshake fails.
    pub async fn connect_addr(&self, host: &str, port: u16) -> AppResult<NodeIdentity> {
        session::dial(&self.inner, host, port).await
    }

    /// Make sure a session to `peer` exists, dialing lazily through the
    /// registry's address book.
    pub async fn ensure_session(&self, peer: NodeIdentity) -> AppResult<()> {
        if self.inner.has_session(peer) {
            return Ok(());
        }
        let (host, port) = self.inner.registry.addr_of(peer).ok_or_else(|| {
            AppError::transport(TransportError::UnknownPeer {
                peer: peer.to_string(),
            })
        })?;
        match session::dial(&self.inner, &host, port).await {
            Ok(_) => Ok(()),
            // A concurrent dial or inbound accept may have won the race.
            Err(_) if self.inner.has_session(peer) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// `ensure_session` with an explicit address for peers the registry does
    /// not know yet (snapshot requesters).
    pub async fn ensure_session_with(
        &self,
        peer: NodeIdentity,
        host: &str,
        port: u16,
    ) -> AppResult<()> {
        if self.inner.has_session(peer) {
            return Ok(());
        }
        match session::dial(&self.inner, host, port).await {
            Ok(_) => Ok(()),
            Err(_) if self.inner.has_session(peer) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Send one frame to a peer, establishing the session if needed.
    ///
    /// Non-CONTROL frames are dropped (and counted) when the outbound queue
    /// is at its high-watermark; CONTROL frames block up to the configured
    /// timeout and then fail the session.
    pub async fn send(&self, peer: NodeIdentity, payload: Payload) -> AppResult<()> {
        self.ensure_session(peer).await?;
        self.enqueue(peer, payload).await
    }

    pub async fn send_with_addr(
        &self,
        peer: NodeIdentity,
        host: &str,
        port: u16,
        payload: Payload,
    ) -> AppResult<()> {
        self.ensure_session_with(peer, host, port).await?;
        self.enqueue(peer, payload).await
    }

    async fn enqueue(&self, peer: NodeIdentity, payload: Payload) -> AppResult<()> {
        let sender = {
            let sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.get(&peer).map(|handle| handle.outbound.clone())
        };
        let sender = sender.ok_or_else(|| {
            AppError::transport(TransportError::SessionClosed {
                peer: peer.to_string(),
            })
        })?;

        if payload.kind() == FrameKind::Control {
            let timeout = self.inner.config.control_send_timeout;
            match tokio::time::timeout(timeout, sender.send(payload)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(AppError::transport(TransportError::SessionClosed {
                    peer: peer.to_string(),
                })),
                Err(_) => {
                    fail_session(&self.inner, peer);
                    Err(AppError::transport(TransportError::ControlSendTimeout {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }))
                }
            }
        } else {
            match sender.try_send(payload) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    self.inner.metrics.inc(
                        "transport_dropped_frames_total",
                        &labels([("kind", dropped.kind().name())]),
                    );
                    Ok(())
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    Err(AppError::transport(TransportError::SessionClosed {
                        peer: peer.to_string(),
                    }))
                }
            }
        }
    }

    /// Send a PING and wait for the matching PONG. Callers bound this with
    /// their own timeout; the pending entry is cleaned up either way.
    pub async fn ping(&self, peer: NodeIdentity) -> AppResult<()> {
        let nonce = self.inner.ping_nonce.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .inner
                .pending_pongs
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            pending.insert(nonce, tx);
        }
        let _cleanup = PendingPongGuard {
            inner: &*self.inner,
            nonce,
        };
        self.send(peer, Payload::Ping { nonce }).await?;
        rx.await
            .map_err(|_| AppError::transport(TransportError::ConnectionClosed))
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        let sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.len()
    }

    /// Graceful teardown: BYE to every peer, then close all sessions.
    pub async fn shutdown_sessions(&self) {
        let senders: Vec<(NodeIdentity, mpsc::Sender<Payload>)> = {
            let sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions
                .iter()
                .map(|(peer, handle)| (*peer, handle.outbound.clone()))
                .collect()
        };
        for (peer, sender) in senders {
            if sender.try_send(Payload::Bye).is_err() {
                trace!("Could not send BYE to {}", peer.short());
            }
        }
        // Give writers a moment to flush the BYEs.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let mut sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in sessions.drain() {
            handle.close();
        }
    }
}

struct PendingPongGuard<'a> {
    inner: &'a TransportInner,
    nonce: u64,
}

impl Drop for PendingPongGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self
            .inner
            .pending_pongs
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        pending.remove(&self.nonce);
    }
}

impl TransportInner {
    fn has_session(&self, peer: NodeIdentity) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.contains_key(&peer)
    }

    pub(super) fn complete_pong(&self, nonce: u64) {
        let sender = {
            let mut pending = self.pending_pongs.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(&nonce)
        };
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// Drop the session without suspecting the peer (BYE, shutdown).
    pub(super) fn remove_session(&self, peer: NodeIdentity) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = sessions.remove(&peer) {
            handle.close();
        }
    }
}

/// Session failure: close, suspect the peer, schedule reconnection.
pub(super) fn fail_session(inner: &Arc<TransportInner>, peer: NodeIdentity) {
    inner.remove_session(peer);
    inner.registry.mark_suspect(peer);
    inner
        .metrics
        .inc("transport_session_failures_total", &labels([]));
    spawn_reconnect(Arc::clone(inner), peer);
}

fn spawn_accept_loop(inner: Arc<TransportInner>, listener: TcpListener) {
    let mut shutdown_rx = inner.shutdown.subscribe();
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown_rx.recv() => break,
            };
            match accepted {
                Ok((stream, addr)) => {
                    let inner = Arc::clone(&inner);
                    tokio::spawn(async move {
                        if let Err(err) = session::accept_session(inner, stream).await {
                            debug!("Inbound session from {} refused: {}", addr, err);
                        }
                    });
                }
                Err(err) => {
                    debug!("Accept failed: {}", err);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            }
        }
    });
}

/// Keep dialing with backoff until a session exists again, the peer leaves
/// the address book, or shutdown. At most one reconnect task per peer.
fn spawn_reconnect(inner: Arc<TransportInner>, peer: NodeIdentity) {
    {
        let mut reconnecting = inner.reconnecting.lock().unwrap_or_else(|e| e.into_inner());
        if !reconnecting.insert(peer) {
            return;
        }
    }
    let mut shutdown_rx = inner.shutdown.subscribe();
    tokio::spawn(async move {
        let mut backoff = Backoff::new(inner.config.reconnect_base, inner.config.reconnect_cap);
        loop {
            if inner.has_session(peer) {
                break;
            }
            let Some((host, port)) = inner.registry.addr_of(peer) else {
                break;
            };
            let delay = backoff.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => break,
            }
            if inner.has_session(peer) {
                break;
            }
            match session::dial(&inner, &host, port).await {
                Ok(_) => {
                    debug!("Reconnected to {}", peer.short());
                    break;
                }
                Err(err) => trace!("Reconnect to {} failed: {}", peer.short(), err),
            }
        }
        let mut reconnecting = inner.reconnecting.lock().unwrap_or_else(|e| e.into_inner());
        reconnecting.remove(&peer);
    });
}
