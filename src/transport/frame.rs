use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::cluster::NodeIdentity;
use crate::error::{AppError, AppResult, TransportError};
use crate::gossip::ControlEnvelope;
use crate::metrics::Snapshot;

pub const PROTOCOL_VERSION_MAJOR: u32 = 1;
pub const PROTOCOL_VERSION_MINOR: u32 = 0;

/// Frame-kind contract marker. Peers missing it are refused at HELLO_ACK.
pub const FEATURE_FRAMES_V1: &str = "frames-v1";

/// On-wire frame kinds. The kind byte precedes the JSON payload; the payload
/// is also schema-tagged, and the two must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Hello = 1,
    HelloAck = 2,
    Ping = 3,
    Pong = 4,
    Gossip = 5,
    Control = 6,
    SnapshotReq = 7,
    SnapshotResp = 8,
    Bye = 9,
}

impl FrameKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            FrameKind::Hello => "HELLO",
            FrameKind::HelloAck => "HELLO_ACK",
            FrameKind::Ping => "PING",
            FrameKind::Pong => "PONG",
            FrameKind::Gossip => "GOSSIP",
            FrameKind::Control => "CONTROL",
            FrameKind::SnapshotReq => "SNAPSHOT_REQ",
            FrameKind::SnapshotResp => "SNAPSHOT_RESP",
            FrameKind::Bye => "BYE",
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(FrameKind::Hello),
            2 => Some(FrameKind::HelloAck),
            3 => Some(FrameKind::Ping),
            4 => Some(FrameKind::Pong),
            5 => Some(FrameKind::Gossip),
            6 => Some(FrameKind::Control),
            7 => Some(FrameKind::SnapshotReq),
            8 => Some(FrameKind::SnapshotResp),
            9 => Some(FrameKind::Bye),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    pub identity: NodeIdentity,
    pub host: String,
    pub port: u16,
    pub started_at_ms: u64,
    pub version_major: u32,
    pub version_minor: u32,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerExchangeEntry {
    pub identity: NodeIdentity,
    pub host: String,
    pub port: u16,
    /// When the *sender* last observed this peer, epoch millis.
    pub last_seen_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipPayload {
    pub entries: Vec<PeerExchangeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequesterInfo {
    pub identity: NodeIdentity,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub request_id: String,
    pub requester: RequesterInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub request_id: String,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Hello(HelloPayload),
    HelloAck(HelloPayload),
    Ping { nonce: u64 },
    Pong { nonce: u64 },
    Gossip(GossipPayload),
    Control(ControlEnvelope),
    SnapshotReq(SnapshotRequest),
    SnapshotResp(Box<SnapshotResponse>),
    Bye,
}

impl Payload {
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            Payload::Hello(_) => FrameKind::Hello,
            Payload::HelloAck(_) => FrameKind::HelloAck,
            Payload::Ping { .. } => FrameKind::Ping,
            Payload::Pong { .. } => FrameKind::Pong,
            Payload::Gossip(_) => FrameKind::Gossip,
            Payload::Control(_) => FrameKind::Control,
            Payload::SnapshotReq(_) => FrameKind::SnapshotReq,
            Payload::SnapshotResp(_) => FrameKind::SnapshotResp,
            Payload::Bye => FrameKind::Bye,
        }
    }
}

/// Read one `u32 length | u8 kind | payload` frame.
///
/// # Errors
///
/// `ConnectionClosed` on clean EOF before a length prefix; `Decode` when the
/// payload does not parse or disagrees with the kind byte (the stream stays
/// aligned, so callers may keep the session).
pub async fn read_frame<R>(reader: &mut R, max_bytes: usize) -> AppResult<Payload>
where
    R: AsyncRead + Unpin,
{
    let length = match reader.read_u32().await {
        Ok(length) => length as usize,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(AppError::transport(TransportError::ConnectionClosed));
        }
        Err(err) => {
            return Err(AppError::transport(TransportError::Io {
                context: "read frame length",
                source: err,
            }));
        }
    };
    if length == 0 || length > max_bytes {
        return Err(AppError::transport(TransportError::FrameTooLarge {
            max_bytes,
            got_bytes: length,
        }));
    }
    let mut buffer = vec![0u8; length];
    reader.read_exact(&mut buffer).await.map_err(|err| {
        AppError::transport(TransportError::Io {
            context: "read frame body",
            source: err,
        })
    })?;

    let kind = FrameKind::from_u8(buffer[0])
        .ok_or(AppError::transport(TransportError::UnknownFrameKind { kind: buffer[0] }))?;
    let payload: Payload = serde_json::from_slice(&buffer[1..]).map_err(|err| {
        AppError::transport(TransportError::Decode {
            context: "frame payload",
            source: err,
        })
    })?;
    if payload.kind() != kind {
        return Err(AppError::transport(TransportError::UnknownFrameKind {
            kind: buffer[0],
        }));
    }
    Ok(payload)
}

/// Write one frame.
///
/// # Errors
///
/// Returns an error when the encoded payload exceeds `max_bytes` or the
/// socket write fails.
pub async fn write_frame<W>(writer: &mut W, payload: &Payload, max_bytes: usize) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(payload).map_err(|err| {
        AppError::transport(TransportError::Encode {
            context: "frame payload",
            source: err,
        })
    })?;
    let length = body.len() + 1;
    if length > max_bytes {
        return Err(AppError::transport(TransportError::FrameTooLarge {
            max_bytes,
            got_bytes: length,
        }));
    }
    let mut frame = Vec::with_capacity(4 + length);
    frame.extend_from_slice(&u32::try_from(length).unwrap_or(u32::MAX).to_be_bytes());
    frame.push(payload.kind() as u8);
    frame.extend_from_slice(&body);
    writer.write_all(&frame).await.map_err(|err| {
        AppError::transport(TransportError::Io {
            context: "write frame",
            source: err,
        })
    })?;
    writer.flush().await.map_err(|err| {
        AppError::transport(TransportError::Io {
            context: "flush frame",
            source: err,
        })
    })
}
