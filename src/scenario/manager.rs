use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::cluster::{epoch_ms, PeerRegistry};
use crate::config::NodeConfig;
use crate::datapool::Datapool;
use crate::error::{AppError, AppResult, ScenarioError};
use crate::gossip::{ControlPayload, Gossip};
use crate::metrics::{labels, Metrics};
use crate::shutdown::ShutdownSender;

use super::pacer::{spawn_pacer, PacerHandle, PacerSpec, PacerState};
use super::{ScenarioBlueprint, ScenarioDef, ScenarioId, ScenarioRegistry};

#[derive(Debug, Clone, Serialize)]
pub struct JourneyStatus {
    pub name: String,
    pub state: PacerState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioStatus {
    pub id: ScenarioId,
    pub spec: String,
    pub started_at_ms: u64,
    pub journeys: Vec<JourneyStatus>,
}

struct ActiveScenario {
    def: ScenarioDef,
    pacers: Vec<PacerHandle>,
    datapools: Vec<Datapool>,
}

struct ManagerInner {
    registry: Arc<PeerRegistry>,
    scenarios: ScenarioRegistry,
    config: Arc<NodeConfig>,
    metrics: Metrics,
    gossip: Gossip,
    pool: Arc<Semaphore>,
    http: reqwest::Client,
    shutdown: ShutdownSender,
    active: Mutex<HashMap<ScenarioId, ActiveScenario>>,
    // ScenarioStop seen before its ScenarioStart; applied if the start
    // arrives within the tombstone window.
    tombstones: Mutex<HashMap<ScenarioId, Instant>>,
}

/// Owns the set of active scenarios on this node. Starts are idempotent by
/// scenario id regardless of origin.
#[derive(Clone)]
pub struct ScenarioManager {
    inner: Arc<ManagerInner>,
}

impl ScenarioManager {
    #[must_use]
    pub fn new(
        registry: Arc<PeerRegistry>,
        scenarios: ScenarioRegistry,
        config: Arc<NodeConfig>,
        metrics: Metrics,
        gossip: Gossip,
        http: reqwest::Client,
        shutdown: ShutdownSender,
    ) -> Self {
        let pool = Arc::new(Semaphore::new(config.max_in_flight_journeys));
        ScenarioManager {
            inner: Arc::new(ManagerInner {
                registry,
                scenarios,
                config,
                metrics,
                gossip,
                pool,
                http,
                shutdown,
                active: Mutex::new(HashMap::new()),
                tombstones: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a scenario originated on this node and broadcast it.
    pub async fn start_local(&self, spec: &str) -> AppResult<ScenarioId> {
        let blueprint = self.inner.scenarios.resolve(spec).ok_or_else(|| {
            AppError::scenario(ScenarioError::UnknownScenario {
                spec: spec.to_owned(),
                known: self.inner.scenarios.known(),
            })
        })?;
        let def = ScenarioDef {
            scenario_id: ScenarioId::generate(),
            spec: spec.to_owned(),
            started_at_ms: epoch_ms(),
            start_delay_s: blueprint.start_delay.as_secs_f64(),
            journeys: blueprint.journeys.iter().map(|j| j.def.clone()).collect(),
        };
        let started = self.start_internal(def.clone(), blueprint).await?;
        if started {
            self.inner
                .gossip
                .broadcast(ControlPayload::ScenarioStart {
                    scenario: def.clone(),
                })
                .await;
        }
        Ok(def.scenario_id)
    }

    /// Apply a gossiped start. Unknown specs and build failures are counted
    /// and skipped; availability beats one missing scenario.
    pub async fn start_from_gossip(&self, def: ScenarioDef) {
        let Some(blueprint) = self.inner.scenarios.resolve(&def.spec) else {
            warn!(
                "Ignoring gossiped scenario {} with unknown spec {:?}",
                def.scenario_id.short(),
                def.spec
            );
            self.inner
                .metrics
                .inc("scenario_unresolved_total", &labels([]));
            return;
        };
        if let Err(err) = self.start_internal(def, blueprint).await {
            warn!("Gossiped scenario start failed: {}", err);
        }
    }

    /// Start a fully-specified scenario (dashboard surface). Broadcasts like
    /// a local start.
    pub async fn start_def(&self, def: ScenarioDef) -> AppResult<ScenarioId> {
        let blueprint = self.inner.scenarios.resolve(&def.spec).ok_or_else(|| {
            AppError::scenario(ScenarioError::UnknownScenario {
                spec: def.spec.clone(),
                known: self.inner.scenarios.known(),
            })
        })?;
        let id = def.scenario_id;
        let started = self.start_internal(def.clone(), blueprint).await?;
        if started {
            self.inner
                .gossip
                .broadcast(ControlPayload::ScenarioStart { scenario: def })
                .await;
        }
        Ok(id)
    }

    async fn start_internal(
        &self,
        def: ScenarioDef,
        blueprint: ScenarioBlueprint,
    ) -> AppResult<bool> {
        let inner = &self.inner;
        let id = def.scenario_id;

        {
            let mut tombstones = inner.tombstones.lock().unwrap_or_else(|e| e.into_inner());
            let window = inner.config.tombstone_window;
            tombstones.retain(|_, seen| seen.elapsed() < window);
            if tombstones.remove(&id).is_some() {
                info!(
                    "Scenario {} was stopped before its start arrived; not starting",
                    id.short()
                );
                return Ok(false);
            }
        }
        {
            let active = inner.active.lock().unwrap_or_else(|e| e.into_inner());
            if active.contains_key(&id) {
                debug!("Scenario {} already active; idempotent start", id.short());
                return Ok(false);
            }
            if active.len() >= inner.config.max_scenarios {
                return Err(AppError::scenario(ScenarioError::TooManyScenarios {
                    max: inner.config.max_scenarios,
                }));
            }
        }
        if def.journeys.len() > inner.config.max_pacers_per_scenario {
            return Err(AppError::scenario(ScenarioError::TooManyJourneys {
                max: inner.config.max_pacers_per_scenario,
            }));
        }

        // Anchor the delay to the origin's start time so every node begins
        // at (roughly) the same wall-clock moment.
        let delay_ms = (def.start_delay_s.max(0.0) * 1000.0) as u64;
        let target_ms = def.started_at_ms.saturating_add(delay_ms);
        let start_delay = Duration::from_millis(target_ms.saturating_sub(epoch_ms()));

        // The wire definition is authoritative for volumes and datapools;
        // the local blueprint only supplies the journey implementations.
        let mut implementations: HashMap<String, Arc<dyn crate::journey::Journey>> = blueprint
            .journeys
            .into_iter()
            .map(|journey| (journey.def.name.clone(), journey.journey))
            .collect();

        let mut pacers: Vec<PacerHandle> = Vec::with_capacity(def.journeys.len());
        let mut datapools = Vec::new();
        for journey_def in &def.journeys {
            let Some(journey) = implementations.remove(&journey_def.name) else {
                warn!(
                    "Scenario {} names journey {:?} with no local implementation; skipping",
                    id.short(),
                    journey_def.name
                );
                inner
                    .metrics
                    .inc("scenario_unresolved_total", &labels([]));
                continue;
            };
            let datapool = match &journey_def.datapool {
                Some(descriptor) => {
                    match Datapool::build(descriptor, inner.config.datapool_channel_capacity).await
                    {
                        Ok(pool) => {
                            datapools.push(pool.clone());
                            Some(pool)
                        }
                        Err(err) => {
                            // Fold away whatever was already spawned.
                            for pacer in &pacers {
                                pacer.request_drain();
                            }
                            for pool in &datapools {
                                pool.close();
                            }
                            return Err(err);
                        }
                    }
                }
                None => None,
            };
            let handle = spawn_pacer(
                PacerSpec {
                    journey,
                    journey_name: journey_def.name.clone(),
                    scenario_label: def.spec.clone(),
                    volume: journey_def.volume,
                    datapool,
                    pool: Arc::clone(&inner.pool),
                    registry: Arc::clone(&inner.registry),
                    metrics: Arc::clone(&inner.metrics),
                    config: Arc::clone(&inner.config),
                    http: inner.http.clone(),
                    start_delay,
                },
                inner.shutdown.subscribe(),
            );
            pacers.push(handle);
        }

        let receivers: Vec<watch::Receiver<PacerState>> =
            pacers.iter().map(PacerHandle::state_receiver).collect();
        {
            let mut active = inner.active.lock().unwrap_or_else(|e| e.into_inner());
            if active.contains_key(&id) {
                // Lost a start race; fold these pacers away.
                for pacer in &pacers {
                    pacer.request_drain();
                }
                return Ok(false);
            }
            active.insert(
                id,
                ActiveScenario {
                    def,
                    pacers,
                    datapools,
                },
            );
        }
        spawn_completion_watcher(Arc::clone(inner), id, receivers);
        info!("Scenario {} started", id.short());
        Ok(true)
    }

    /// Transition all pacers of a scenario to DRAINING. Unknown ids leave a
    /// tombstone so a late-arriving start is suppressed.
    pub fn stop(&self, id: ScenarioId) -> bool {
        let inner = &self.inner;
        let active = inner.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(&id) {
            Some(scenario) => {
                info!("Stopping scenario {}", id.short());
                for pacer in &scenario.pacers {
                    pacer.request_drain();
                }
                for pool in &scenario.datapools {
                    pool.close();
                }
                true
            }
            None => {
                drop(active);
                let mut tombstones = inner.tombstones.lock().unwrap_or_else(|e| e.into_inner());
                tombstones.insert(id, Instant::now());
                false
            }
        }
    }

    #[must_use]
    pub fn list(&self) -> Vec<ScenarioStatus> {
        let active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        let mut statuses: Vec<ScenarioStatus> = active
            .values()
            .map(|scenario| ScenarioStatus {
                id: scenario.def.scenario_id,
                spec: scenario.def.spec.clone(),
                started_at_ms: scenario.def.started_at_ms,
                journeys: scenario
                    .pacers
                    .iter()
                    .map(|pacer| JourneyStatus {
                        name: pacer.journey_name.clone(),
                        state: pacer.state(),
                    })
                    .collect(),
            })
            .collect();
        statuses.sort_by_key(|status| status.id);
        statuses
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        let active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        active.len()
    }

    /// Drain everything; used during node shutdown.
    pub fn drain_all(&self) {
        let active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        for scenario in active.values() {
            for pacer in &scenario.pacers {
                pacer.request_drain();
            }
            for pool in &scenario.datapools {
                pool.close();
            }
        }
    }

    /// Wait until every scenario has self-stopped, up to `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.active_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Scenarios self-stop: when every pacer reports STOPPED the entry is
/// removed and its datapools closed.
fn spawn_completion_watcher(
    inner: Arc<ManagerInner>,
    id: ScenarioId,
    mut receivers: Vec<watch::Receiver<PacerState>>,
) {
    tokio::spawn(async move {
        for receiver in &mut receivers {
            loop {
                if *receiver.borrow() == PacerState::Stopped {
                    break;
                }
                if receiver.changed().await.is_err() {
                    break;
                }
            }
        }
        let removed = {
            let mut active = inner.active.lock().unwrap_or_else(|e| e.into_inner());
            active.remove(&id)
        };
        if let Some(scenario) = removed {
            for pool in &scenario.datapools {
                pool.close();
            }
            info!("Scenario {} complete", id.short());
        }
    });
}
