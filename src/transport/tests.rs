use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::cluster::{NodeIdentity, NodeInfo, PeerRegistry, PeerState};
use crate::config::NodeConfig;
use crate::error::{AppError, AppResult, TransportError};
use crate::metrics::MetricsRegistry;
use crate::shutdown;

use super::*;

const MAX_BYTES: usize = 4 * 1024 * 1024;

fn gossip_payload() -> Payload {
    Payload::Gossip(GossipPayload {
        entries: vec![PeerExchangeEntry {
            identity: NodeIdentity::from_raw(7),
            host: "10.0.0.7".to_owned(),
            port: 42042,
            last_seen_ms: 123,
        }],
    })
}

#[tokio::test]
async fn frame_roundtrips_through_a_stream() -> AppResult<()> {
    let (mut client, mut server) = tokio::io::duplex(64 * 1024);
    write_frame(&mut client, &gossip_payload(), MAX_BYTES).await?;
    write_frame(&mut client, &Payload::Ping { nonce: 9 }, MAX_BYTES).await?;

    let first = read_frame(&mut server, MAX_BYTES).await?;
    assert_eq!(first.kind(), FrameKind::Gossip);
    match first {
        Payload::Gossip(payload) => {
            assert_eq!(payload.entries.len(), 1);
            assert_eq!(payload.entries[0].port, 42042);
        }
        other => panic!("Unexpected payload: {:?}", other),
    }
    let second = read_frame(&mut server, MAX_BYTES).await?;
    match second {
        Payload::Ping { nonce } => assert_eq!(nonce, 9),
        other => panic!("Unexpected payload: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn oversized_frames_are_refused_on_both_sides() -> AppResult<()> {
    let (mut client, mut server) = tokio::io::duplex(64 * 1024);
    let big = Payload::Gossip(GossipPayload {
        entries: (0..64)
            .map(|idx| PeerExchangeEntry {
                identity: NodeIdentity::from_raw(idx),
                host: "x".repeat(64),
                port: 1,
                last_seen_ms: 0,
            })
            .collect(),
    });
    // Writer refuses before any bytes hit the wire.
    assert!(write_frame(&mut client, &big, 128).await.is_err());

    // Reader refuses a length prefix above its cap.
    write_frame(&mut client, &big, MAX_BYTES).await?;
    let result = read_frame(&mut server, 128).await;
    match result {
        Err(AppError::Transport(TransportError::FrameTooLarge { .. })) => Ok(()),
        other => panic!("Expected FrameTooLarge, got {:?}", other.map(|p| p.kind())),
    }
}

#[tokio::test]
async fn decode_errors_keep_the_stream_aligned() -> AppResult<()> {
    use tokio::io::AsyncWriteExt;

    let (mut client, mut server) = tokio::io::duplex(64 * 1024);
    // A syntactically valid frame whose payload JSON does not parse.
    let junk = b"not json at all";
    let mut frame = Vec::new();
    frame.extend_from_slice(&u32::try_from(junk.len() + 1).unwrap_or(0).to_be_bytes());
    frame.push(FrameKind::Gossip as u8);
    frame.extend_from_slice(junk);
    client.write_all(&frame).await?;
    write_frame(&mut client, &Payload::Ping { nonce: 1 }, MAX_BYTES).await?;

    let first = read_frame(&mut server, MAX_BYTES).await;
    assert!(matches!(
        first,
        Err(AppError::Transport(TransportError::Decode { .. }))
    ));
    // The next frame parses cleanly.
    let second = read_frame(&mut server, MAX_BYTES).await?;
    assert_eq!(second.kind(), FrameKind::Ping);
    Ok(())
}

#[tokio::test]
async fn unknown_kind_bytes_are_rejected() -> AppResult<()> {
    use tokio::io::AsyncWriteExt;

    let (mut client, mut server) = tokio::io::duplex(1024);
    client.write_all(&5u32.to_be_bytes()).await?;
    client.write_all(&[0xEE, b'{', b'}', b'x', b'y']).await?;
    let result = read_frame(&mut server, MAX_BYTES).await;
    assert!(matches!(
        result,
        Err(AppError::Transport(TransportError::UnknownFrameKind { kind: 0xEE }))
    ));
    Ok(())
}

struct Harness {
    transport: Transport,
    registry: Arc<PeerRegistry>,
    inbound: mpsc::Receiver<InboundFrame>,
    identity: NodeIdentity,
    addr: (String, u16),
}

async fn start_node(config: Arc<NodeConfig>) -> AppResult<Harness> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let local = NodeInfo::new("127.0.0.1".to_owned(), port);
    let identity = local.identity;
    let registry = Arc::new(PeerRegistry::new(
        local.clone(),
        config.max_peers,
        config.quarantine,
        config.suspect_to_dead,
    ));
    let metrics = Arc::new(MetricsRegistry::new(identity, 64));
    let (shutdown_tx, _) = shutdown::channel();
    let (transport, inbound) = Transport::start(
        listener,
        local,
        Arc::clone(&config),
        Arc::clone(&registry),
        metrics,
        shutdown_tx,
    );
    Ok(Harness {
        transport,
        registry,
        inbound,
        identity,
        addr: ("127.0.0.1".to_owned(), port),
    })
}

#[tokio::test]
async fn handshake_registers_both_sides_alive() -> AppResult<()> {
    let config = Arc::new(NodeConfig::default());
    let a = start_node(Arc::clone(&config)).await?;
    let b = start_node(Arc::clone(&config)).await?;

    let dialed = a.transport.connect_addr(&b.addr.0, b.addr.1).await?;
    assert_eq!(dialed, b.identity);
    assert_eq!(a.registry.state_of(b.identity), Some(PeerState::Alive));
    assert_eq!(a.transport.session_count(), 1);

    // The accept side installs its session and record too.
    let converged = tokio::time::timeout(Duration::from_secs(5), async {
        while b.registry.state_of(a.identity) != Some(PeerState::Alive) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if converged.is_err() {
        panic!("Accept side never marked the dialer alive");
    }
    assert_eq!(b.transport.session_count(), 1);
    Ok(())
}

#[tokio::test]
async fn ping_pong_completes_over_a_real_session() -> AppResult<()> {
    let config = Arc::new(NodeConfig::default());
    let a = start_node(Arc::clone(&config)).await?;
    let b = start_node(Arc::clone(&config)).await?;

    a.transport.connect_addr(&b.addr.0, b.addr.1).await?;
    match tokio::time::timeout(Duration::from_secs(2), a.transport.ping(b.identity)).await {
        Ok(result) => result?,
        Err(_) => panic!("PONG did not arrive within 2s"),
    }
    Ok(())
}

#[tokio::test]
async fn frames_are_delivered_to_the_peer_dispatcher() -> AppResult<()> {
    let config = Arc::new(NodeConfig::default());
    let a = start_node(Arc::clone(&config)).await?;
    let mut b = start_node(Arc::clone(&config)).await?;

    a.transport.connect_addr(&b.addr.0, b.addr.1).await?;
    a.transport.send(b.identity, gossip_payload()).await?;

    let frame = match tokio::time::timeout(Duration::from_secs(5), b.inbound.recv()).await {
        Ok(Some(frame)) => frame,
        Ok(None) => panic!("Inbound channel closed"),
        Err(_) => panic!("No frame delivered within 5s"),
    };
    assert_eq!(frame.from, a.identity);
    assert_eq!(frame.payload.kind(), FrameKind::Gossip);
    Ok(())
}

#[tokio::test]
async fn dial_to_a_dead_port_is_a_connection_error() -> AppResult<()> {
    let config = Arc::new(NodeConfig::default());
    let a = start_node(Arc::clone(&config)).await?;
    // Bind-then-drop to get a port nothing listens on.
    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };
    let result = a.transport.connect_addr("127.0.0.1", dead_port).await;
    assert!(matches!(
        result,
        Err(AppError::Transport(TransportError::Connection { .. }))
    ));
    Ok(())
}

#[tokio::test]
async fn send_to_unknown_peer_fails() -> AppResult<()> {
    let config = Arc::new(NodeConfig::default());
    let a = start_node(Arc::clone(&config)).await?;
    let stranger = NodeIdentity::from_raw(0xdead);
    let result = a.transport.send(stranger, Payload::Ping { nonce: 1 }).await;
    assert!(matches!(
        result,
        Err(AppError::Transport(TransportError::UnknownPeer { .. }))
    ));
    Ok(())
}
