use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::cluster::NodeIdentity;
use crate::error::{AppError, AppResult, GossipError, TransportError};
use crate::metrics::labels;

use super::frame::{
    read_frame, write_frame, HelloPayload, Payload, FEATURE_FRAMES_V1, PROTOCOL_VERSION_MAJOR,
    PROTOCOL_VERSION_MINOR,
};
use super::{InboundFrame, TransportInner};

pub(super) struct SessionHandle {
    pub(super) outbound: mpsc::Sender<Payload>,
    pub(super) dialed_by_local: bool,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl SessionHandle {
    pub(super) fn close(&self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

pub(super) fn local_hello(inner: &TransportInner) -> HelloPayload {
    let local = &inner.local;
    HelloPayload {
        identity: local.identity,
        host: local.host.clone(),
        port: local.port,
        started_at_ms: local.started_at_ms,
        version_major: PROTOCOL_VERSION_MAJOR,
        version_minor: PROTOCOL_VERSION_MINOR,
        features: vec![FEATURE_FRAMES_V1.to_owned()],
    }
}

fn validate_remote(inner: &TransportInner, hello: &HelloPayload) -> AppResult<()> {
    if hello.identity == inner.local.identity {
        return Err(AppError::transport(TransportError::IdentityCollision));
    }
    if hello.version_major != PROTOCOL_VERSION_MAJOR {
        return Err(AppError::transport(TransportError::VersionMismatch {
            local: PROTOCOL_VERSION_MAJOR,
            remote: hello.version_major,
        }));
    }
    if !hello.features.iter().any(|f| f == FEATURE_FRAMES_V1) {
        return Err(AppError::transport(TransportError::FeatureMismatch {
            feature: FEATURE_FRAMES_V1,
        }));
    }
    Ok(())
}

fn reject_handshake(inner: &TransportInner, hello: &HelloPayload, err: &AppError) {
    debug!(
        "Refusing session with {}: {}",
        hello.identity.short(),
        err
    );
    if matches!(
        err,
        AppError::Transport(
            TransportError::VersionMismatch { .. } | TransportError::FeatureMismatch { .. }
        )
    ) {
        inner
            .registry
            .quarantine_peer(hello.identity, &hello.host, hello.port);
    }
}

/// Dial a peer and run the client side of the handshake.
pub(super) async fn dial(
    inner: &Arc<TransportInner>,
    host: &str,
    port: u16,
) -> AppResult<NodeIdentity> {
    let addr = format!("{}:{}", host, port);
    let stream = TcpStream::connect(&addr).await.map_err(|err| {
        AppError::transport(TransportError::Connection {
            addr: addr.clone(),
            source: err,
        })
    })?;
    let _ = stream.set_nodelay(true);
    let (mut read_half, mut write_half) = stream.into_split();

    let max_bytes = inner.config.max_frame_bytes;
    write_frame(
        &mut write_half,
        &Payload::Hello(local_hello(inner)),
        max_bytes,
    )
    .await?;
    let ack = tokio::time::timeout(
        inner.config.handshake_timeout,
        read_frame(&mut read_half, max_bytes),
    )
    .await
    .map_err(|_| AppError::transport(TransportError::HandshakeTimeout))??;

    let remote = match ack {
        Payload::HelloAck(remote) => remote,
        other => {
            return Err(AppError::transport(TransportError::ExpectedHello {
                kind: other.kind().name(),
            }));
        }
    };
    if let Err(err) = validate_remote(inner, &remote) {
        reject_handshake(inner, &remote, &err);
        return Err(err);
    }
    if !inner
        .registry
        .note_seen(remote.identity, &remote.host, remote.port)
    {
        return Err(AppError::transport(TransportError::SessionClosed {
            peer: remote.identity.to_string(),
        }));
    }
    let identity = remote.identity;
    install_session(inner, read_half, write_half, remote, true);
    Ok(identity)
}

/// Run the server side of the handshake for an accepted connection.
pub(super) async fn accept_session(
    inner: Arc<TransportInner>,
    stream: TcpStream,
) -> AppResult<NodeIdentity> {
    let _ = stream.set_nodelay(true);
    let (mut read_half, mut write_half) = stream.into_split();
    let max_bytes = inner.config.max_frame_bytes;

    let first = tokio::time::timeout(
        inner.config.handshake_timeout,
        read_frame(&mut read_half, max_bytes),
    )
    .await
    .map_err(|_| AppError::transport(TransportError::HandshakeTimeout))??;

    let remote = match first {
        Payload::Hello(remote) => remote,
        other => {
            return Err(AppError::transport(TransportError::ExpectedHello {
                kind: other.kind().name(),
            }));
        }
    };
    if let Err(err) = validate_remote(&inner, &remote) {
        // No HELLO_ACK: the session is refused here.
        reject_handshake(&inner, &remote, &err);
        return Err(err);
    }
    if !inner
        .registry
        .note_seen(remote.identity, &remote.host, remote.port)
    {
        return Err(AppError::transport(TransportError::SessionClosed {
            peer: remote.identity.to_string(),
        }));
    }
    write_frame(
        &mut write_half,
        &Payload::HelloAck(local_hello(&inner)),
        max_bytes,
    )
    .await?;
    let identity = remote.identity;
    install_session(&inner, read_half, write_half, remote, false);
    Ok(identity)
}

/// Spawn reader/writer tasks and register the session, resolving duplicates:
/// the session dialed by the lower identity wins, the other side is dropped.
fn install_session(
    inner: &Arc<TransportInner>,
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    remote: HelloPayload,
    dialed_by_local: bool,
) {
    let peer = remote.identity;
    let (outbound_tx, outbound_rx) = mpsc::channel(inner.config.session_queue_capacity);

    let writer_task = spawn_writer(Arc::clone(inner), peer, write_half, outbound_rx);
    let reader_task = spawn_reader(Arc::clone(inner), peer, read_half, outbound_tx.clone());

    let handle = SessionHandle {
        outbound: outbound_tx,
        dialed_by_local,
        reader_task,
        writer_task,
    };

    let mut sessions = inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
    match sessions.entry(peer) {
        std::collections::hash_map::Entry::Vacant(slot) => {
            trace!(
                "Session established with {} (dialed_by_local={})",
                peer.short(),
                dialed_by_local
            );
            slot.insert(handle);
        }
        std::collections::hash_map::Entry::Occupied(mut slot) => {
            let prefer_local_dial = inner.local.identity < peer;
            let existing = slot.get();
            let keep_existing = existing.dialed_by_local == prefer_local_dial
                || existing.dialed_by_local == handle.dialed_by_local;
            if keep_existing {
                debug!("Dropping duplicate session with {}", peer.short());
                handle.close();
            } else {
                debug!("Replacing duplicate session with {}", peer.short());
                existing.close();
                slot.insert(handle);
            }
        }
    }
}

fn spawn_writer(
    inner: Arc<TransportInner>,
    peer: NodeIdentity,
    mut write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Payload>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let max_bytes = inner.config.max_frame_bytes;
        while let Some(payload) = outbound_rx.recv().await {
            if let Err(err) = write_frame(&mut write_half, &payload, max_bytes).await {
                trace!("Write to {} failed: {}", peer.short(), err);
                super::fail_session(&inner, peer);
                return;
            }
        }
    })
}

fn spawn_reader(
    inner: Arc<TransportInner>,
    peer: NodeIdentity,
    mut read_half: OwnedReadHalf,
    outbound_tx: mpsc::Sender<Payload>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let max_bytes = inner.config.max_frame_bytes;
        loop {
            match read_frame(&mut read_half, max_bytes).await {
                Ok(Payload::Ping { nonce }) => {
                    // Dropping a PONG under backpressure just looks like a
                    // missed heartbeat to the peer.
                    let _ = outbound_tx.try_send(Payload::Pong { nonce });
                }
                Ok(Payload::Pong { nonce }) => inner.complete_pong(nonce),
                Ok(Payload::Bye) => {
                    debug!("BYE from {}", peer.short());
                    inner.registry.mark_dead(peer);
                    inner.remove_session(peer);
                    return;
                }
                Ok(Payload::Hello(_) | Payload::HelloAck(_)) => {
                    trace!("Unexpected handshake frame mid-session from {}", peer.short());
                }
                Ok(payload) => {
                    let frame = InboundFrame {
                        from: peer,
                        payload,
                    };
                    if inner.inbound_tx.send(frame).await.is_err() {
                        return;
                    }
                }
                Err(AppError::Transport(TransportError::Decode { source, .. })) => {
                    // Stream stays aligned; count and keep the session.
                    let err = AppError::gossip(GossipError::Decode { source });
                    trace!("Malformed frame from {}: {}", peer.short(), err);
                    inner.metrics.inc("gossip_malformed_total", &labels([]));
                }
                Err(err) => {
                    trace!("Read from {} failed: {}", peer.short(), err);
                    super::fail_session(&inner, peer);
                    return;
                }
            }
        }
    })
}
