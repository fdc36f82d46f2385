//! Scenarios: a bounded-lifetime set of journeys with their volume models,
//! the per-journey pacers, and the manager that keeps starts idempotent
//! across CLI and gossip origins.
mod builtins;
mod manager;
mod pacer;
mod volume;

#[cfg(test)]
mod tests;

pub use builtins::builtin_registry;
pub use manager::{JourneyStatus, ScenarioManager, ScenarioStatus};
pub use pacer::{PacerHandle, PacerState};
pub use volume::VolumeModel;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::datapool::DatapoolDescriptor;
use crate::journey::Journey;

/// Globally unique random scenario id, hex-rendered like node identities.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScenarioId(u128);

impl ScenarioId {
    #[must_use]
    pub fn generate() -> Self {
        ScenarioId(rand::thread_rng().gen())
    }

    #[must_use]
    pub const fn from_raw(raw: u128) -> Self {
        ScenarioId(raw)
    }

    #[must_use]
    pub fn short(&self) -> String {
        format!("{:08x}", (self.0 >> 96) as u32)
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScenarioId({:032x})", self.0)
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u128::from_str_radix(s, 16).map(ScenarioId)
    }
}

impl Serialize for ScenarioId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ScenarioId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|err| D::Error::custom(format!("invalid scenario id: {}", err)))
    }
}

/// Wire-serializable description of one journey within a scenario. The
/// journey implementation itself is resolved locally by spec name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyDef {
    pub name: String,
    pub volume: VolumeModel,
    pub datapool: Option<DatapoolDescriptor>,
}

/// Wire-serializable scenario, carried by `ScenarioStart` control messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDef {
    pub scenario_id: ScenarioId,
    /// The `module:attr` spec string this scenario was built from.
    pub spec: String,
    pub started_at_ms: u64,
    #[serde(default)]
    pub start_delay_s: f64,
    pub journeys: Vec<JourneyDef>,
}

/// A journey definition paired with its local implementation.
pub struct JourneyBlueprint {
    pub def: JourneyDef,
    pub journey: Arc<dyn Journey>,
}

/// What a registered scenario builder produces.
pub struct ScenarioBlueprint {
    pub start_delay: Duration,
    pub journeys: Vec<JourneyBlueprint>,
}

type BlueprintBuilder = Arc<dyn Fn() -> ScenarioBlueprint + Send + Sync>;

/// Named scenario builders, keyed by `module:attr` spec string. Nodes only
/// run scenarios whose spec they can resolve here; a gossiped start for an
/// unknown spec is skipped with a counter.
#[derive(Clone, Default)]
pub struct ScenarioRegistry {
    builders: HashMap<String, BlueprintBuilder>,
}

impl ScenarioRegistry {
    #[must_use]
    pub fn new() -> Self {
        ScenarioRegistry::default()
    }

    pub fn register<F>(&mut self, spec: &str, builder: F)
    where
        F: Fn() -> ScenarioBlueprint + Send + Sync + 'static,
    {
        self.builders.insert(spec.to_owned(), Arc::new(builder));
    }

    #[must_use]
    pub fn resolve(&self, spec: &str) -> Option<ScenarioBlueprint> {
        self.builders.get(spec).map(|builder| builder())
    }

    #[must_use]
    pub fn known(&self) -> Vec<String> {
        let mut specs: Vec<String> = self.builders.keys().cloned().collect();
        specs.sort();
        specs
    }
}
