use std::sync::Arc;
use std::time::Duration;

use crate::args::PositiveF64;
use crate::datapool::DatapoolDescriptor;
use crate::journey::HttpJourney;

use super::{JourneyBlueprint, JourneyDef, ScenarioBlueprint, ScenarioRegistry, VolumeModel};

/// Scenarios shipped with the binary. Deployments register their own on top
/// of (or instead of) these; the spec strings follow the `module:attr` form
/// the CLI accepts.
#[must_use]
pub fn builtin_registry() -> ScenarioRegistry {
    let mut registry = ScenarioRegistry::new();

    registry.register("demo:http_get", || ScenarioBlueprint {
        start_delay: Duration::ZERO,
        journeys: vec![JourneyBlueprint {
            def: JourneyDef {
                name: "http_get".to_owned(),
                volume: VolumeModel::new(
                    PositiveF64::clamped(10.0),
                    PositiveF64::clamped(60.0),
                    5.0,
                ),
                datapool: None,
            },
            journey: Arc::new(HttpJourney::new("http_get", "http://127.0.0.1:8000")),
        }],
    });

    registry.register("demo:url_sweep", || {
        let paths = ["/", "/health", "/products", "/products/1", "/search?q=iron"];
        ScenarioBlueprint {
            start_delay: Duration::ZERO,
            journeys: vec![JourneyBlueprint {
                def: JourneyDef {
                    name: "url_sweep".to_owned(),
                    volume: VolumeModel::new(
                        PositiveF64::clamped(25.0),
                        PositiveF64::clamped(120.0),
                        10.0,
                    ),
                    datapool: Some(DatapoolDescriptor::InMemoryRecycle {
                        rows: paths.iter().map(|path| (*path).to_owned()).collect(),
                    }),
                },
                journey: Arc::new(HttpJourney::new("url_sweep", "http://127.0.0.1:8000")),
            }],
        }
    });

    registry
}
