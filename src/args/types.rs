use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, ValidationError};

/// How the node picks the address it binds and advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindMode {
    /// Bind to 127.0.0.1.
    Local,
    /// Bind to a routable local address discovered at startup.
    Public,
    /// Bind to an explicit IP.
    Explicit(IpAddr),
}

impl std::str::FromStr for BindMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim();
        match normalized {
            "local" => Ok(BindMode::Local),
            "public" => Ok(BindMode::Public),
            other => other.parse::<IpAddr>().map(BindMode::Explicit).map_err(|_| {
                AppError::validation(ValidationError::InvalidBindMode {
                    value: s.to_owned(),
                })
            }),
        }
    }
}

impl fmt::Display for BindMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindMode::Local => write!(f, "local"),
            BindMode::Public => write!(f, "public"),
            BindMode::Explicit(ip) => write!(f, "{}", ip),
        }
    }
}

/// A bootstrap peer address, `tcp://host:port` or bare `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapAddr {
    pub host: String,
    pub port: u16,
}

impl std::str::FromStr for BootstrapAddr {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            AppError::validation(ValidationError::InvalidBootstrapAddr {
                value: s.to_owned(),
            })
        };
        let trimmed = s.trim();
        let candidate = if trimmed.contains("://") {
            trimmed.to_owned()
        } else {
            format!("tcp://{}", trimmed)
        };
        let parsed = url::Url::parse(&candidate).map_err(|_| invalid())?;
        if parsed.scheme() != "tcp" {
            return Err(invalid());
        }
        let host = parsed.host_str().ok_or_else(invalid)?.to_owned();
        let port = parsed.port().ok_or_else(invalid)?;
        Ok(BootstrapAddr { host, port })
    }
}

impl fmt::Display for BootstrapAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

/// A scenario spec in `module:attr` form, resolved against the registry of
/// built-in scenario builders at start time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub module: String,
    pub attr: String,
}

impl std::str::FromStr for ScenarioSpec {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (module, attr) = s.split_once(':').ok_or_else(|| {
            AppError::validation(ValidationError::InvalidScenarioSpec {
                value: s.to_owned(),
            })
        })?;
        if module.is_empty() || attr.is_empty() {
            return Err(AppError::validation(ValidationError::InvalidScenarioSpec {
                value: s.to_owned(),
            }));
        }
        Ok(ScenarioSpec {
            module: module.to_owned(),
            attr: attr.to_owned(),
        })
    }
}

impl fmt::Display for ScenarioSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.attr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct PositiveU64(u64);

impl PositiveU64 {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for PositiveU64 {
    type Error = ValidationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            return Err(ValidationError::NotPositive);
        }
        Ok(PositiveU64(value))
    }
}

impl From<PositiveU64> for u64 {
    fn from(value: PositiveU64) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct PositiveUsize(usize);

impl PositiveUsize {
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl TryFrom<usize> for PositiveUsize {
    type Error = ValidationError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        if value == 0 {
            return Err(ValidationError::NotPositive);
        }
        Ok(PositiveUsize(value))
    }
}

impl TryFrom<u64> for PositiveUsize {
    type Error = ValidationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        let value = usize::try_from(value).map_err(|_| ValidationError::NotPositive)?;
        PositiveUsize::try_from(value)
    }
}

impl From<PositiveUsize> for u64 {
    fn from(value: PositiveUsize) -> Self {
        value.0 as u64
    }
}

/// A strictly positive, finite float. Used for rates and durations that must
/// not be zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct PositiveF64(f64);

impl PositiveF64 {
    #[must_use]
    pub const fn get(self) -> f64 {
        self.0
    }

    /// For literal inputs: non-positive or non-finite values are nudged to
    /// the smallest positive value instead of failing.
    #[must_use]
    pub fn clamped(value: f64) -> Self {
        if value.is_finite() && value > 0.0 {
            PositiveF64(value)
        } else {
            PositiveF64(f64::MIN_POSITIVE)
        }
    }
}

impl TryFrom<f64> for PositiveF64 {
    type Error = ValidationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || value <= 0.0 {
            return Err(ValidationError::NotPositiveFinite);
        }
        Ok(PositiveF64(value))
    }
}

impl From<PositiveF64> for f64 {
    fn from(value: PositiveF64) -> Self {
        value.0
    }
}
