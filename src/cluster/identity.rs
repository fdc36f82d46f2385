use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// 128-bit random node identity, generated once at startup and stable for the
/// process lifetime. Rendered as 32 hex chars on the wire and in logs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIdentity(u128);

impl NodeIdentity {
    #[must_use]
    pub fn generate() -> Self {
        NodeIdentity(rand::thread_rng().gen())
    }

    #[must_use]
    pub const fn from_raw(raw: u128) -> Self {
        NodeIdentity(raw)
    }

    /// First 8 hex chars, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        format!("{:08x}", (self.0 >> 96) as u32)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeIdentity({:032x})", self.0)
    }
}

impl std::str::FromStr for NodeIdentity {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u128::from_str_radix(s, 16).map(NodeIdentity)
    }
}

impl Serialize for NodeIdentity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeIdentity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|err| D::Error::custom(format!("invalid node identity: {}", err)))
    }
}

/// What a node advertises about itself in HELLO and gossip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub identity: NodeIdentity,
    pub host: String,
    pub port: u16,
    pub started_at_ms: u64,
}

impl NodeInfo {
    #[must_use]
    pub fn new(host: String, port: u16) -> Self {
        NodeInfo {
            identity: NodeIdentity::generate(),
            host,
            port,
            started_at_ms: epoch_ms(),
        }
    }

    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
