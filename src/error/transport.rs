use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection error to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Frame exceeded max size ({max_bytes} bytes, got {got_bytes}).")]
    FrameTooLarge { max_bytes: usize, got_bytes: usize },
    #[error("Unknown frame kind: {kind:#04x}.")]
    UnknownFrameKind { kind: u8 },
    #[error("Frame decode error during {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Frame encode error during {context}: {source}")]
    Encode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Connection closed.")]
    ConnectionClosed,
    #[error("Session to {peer} is closed.")]
    SessionClosed { peer: String },
    #[error("No session and no known address for peer {peer}.")]
    UnknownPeer { peer: String },
    #[error("Protocol version mismatch (local major {local}, remote major {remote}).")]
    VersionMismatch { local: u32, remote: u32 },
    #[error("Peer does not support required feature {feature:?}.")]
    FeatureMismatch { feature: &'static str },
    #[error("Peer announced our own identity.")]
    IdentityCollision,
    #[error("Outbound queue full; control frame timed out after {timeout_ms} ms.")]
    ControlSendTimeout { timeout_ms: u64 },
    #[error("Handshake timed out.")]
    HandshakeTimeout,
    #[error("Expected HELLO, got {kind}.")]
    ExpectedHello { kind: &'static str },
}
