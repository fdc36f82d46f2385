use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::cluster::PeerRegistry;
use crate::config::NodeConfig;
use crate::datapool::Datapool;
use crate::journey::{run_one, Journey, JourneyContext, RunnerJob};
use crate::metrics::{labels, Metrics};
use crate::shutdown::ShutdownReceiver;

use super::volume::VolumeModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacerState {
    Scheduled,
    Running,
    Draining,
    Stopped,
}

/// Everything one pacer needs at spawn time.
pub(super) struct PacerSpec {
    pub journey: Arc<dyn Journey>,
    pub journey_name: String,
    pub scenario_label: String,
    pub volume: VolumeModel,
    pub datapool: Option<Datapool>,
    pub pool: Arc<Semaphore>,
    pub registry: Arc<PeerRegistry>,
    pub metrics: Metrics,
    pub config: Arc<NodeConfig>,
    pub http: reqwest::Client,
    pub start_delay: Duration,
}

pub struct PacerHandle {
    pub journey_name: String,
    state_rx: watch::Receiver<PacerState>,
    drain_tx: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

impl PacerHandle {
    #[must_use]
    pub fn state(&self) -> PacerState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<PacerState> {
        self.state_rx.clone()
    }

    /// Ask the pacer to stop launching and drain in-flight runs.
    pub fn request_drain(&self) {
        let _ = self.drain_tx.send(true);
    }
}

/// One rate engine per journey: integrates the volume model into a credit
/// accumulator on a fixed tick and launches runs against the shared pool.
pub(super) fn spawn_pacer(spec: PacerSpec, shutdown: ShutdownReceiver) -> PacerHandle {
    let (state_tx, state_rx) = watch::channel(PacerState::Scheduled);
    let (drain_tx, drain_rx) = watch::channel(false);
    let journey_name = spec.journey_name.clone();
    let task = tokio::spawn(run_pacer(spec, state_tx, drain_rx, shutdown));
    PacerHandle {
        journey_name,
        state_rx,
        drain_tx,
        _task: task,
    }
}

async fn run_pacer(
    spec: PacerSpec,
    state_tx: watch::Sender<PacerState>,
    mut drain_rx: watch::Receiver<bool>,
    mut shutdown: ShutdownReceiver,
) {
    let start = Instant::now();
    let start_delay_s = spec.start_delay.as_secs_f64();
    let tick = spec.config.tick;
    let journey_labels = labels([
        ("scenario", spec.scenario_label.as_str()),
        ("journey", spec.journey_name.as_str()),
    ]);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut in_flight: JoinSet<()> = JoinSet::new();

    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut credit: f64 = 0.0;
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = drain_rx.changed() => {
                if changed.is_err() || *drain_rx.borrow() {
                    debug!("Pacer {} drain requested", spec.journey_name);
                    break;
                }
                continue;
            }
            _ = shutdown.recv() => break,
        }

        // Reap finished runs so the set stays small.
        while in_flight.try_join_next().is_some() {}

        let now = Instant::now();
        // Cap the integration step so a stalled runtime cannot burst.
        let dt = now.duration_since(last_tick).as_secs_f64().min(1.0);
        last_tick = now;

        let elapsed = now.duration_since(start).as_secs_f64();
        let t_eff = elapsed - start_delay_s;
        if t_eff < 0.0 {
            continue;
        }
        if *state_tx.borrow() == PacerState::Scheduled {
            info!("Pacer {} running", spec.journey_name);
            let _ = state_tx.send(PacerState::Running);
        }
        if spec.volume.is_complete(t_eff) {
            break;
        }

        let n_alive = spec.registry.alive_len();
        credit += spec.volume.rate_per_node(n_alive, t_eff) * dt;

        while credit >= 1.0 {
            // Saturation drops the launch without refunding the credit.
            credit -= 1.0;
            match Arc::clone(&spec.pool).try_acquire_owned() {
                Ok(permit) => {
                    let job = RunnerJob {
                        journey: Arc::clone(&spec.journey),
                        datapool: spec.datapool.clone(),
                        ctx: JourneyContext::new(
                            spec.scenario_label.clone(),
                            spec.journey_name.clone(),
                            Arc::clone(&spec.metrics),
                            spec.http.clone(),
                            spec.config.request_timeout,
                            cancel_rx.clone(),
                        ),
                    };
                    in_flight.spawn(run_one(job, permit));
                }
                Err(_) => {
                    spec.metrics
                        .inc("journey_backpressure_total", &journey_labels);
                }
            }
            // Interleave with sibling pacers contending for the same pool.
            tokio::task::yield_now().await;
        }
    }

    let _ = state_tx.send(PacerState::Draining);
    drain(&spec, &mut in_flight, &cancel_tx).await;
    info!("Pacer {} stopped", spec.journey_name);
    let _ = state_tx.send(PacerState::Stopped);
}

/// Wait for in-flight runs up to `drain_timeout`, then cancel cooperatively
/// and abort whatever is still outstanding.
async fn drain(spec: &PacerSpec, in_flight: &mut JoinSet<()>, cancel_tx: &watch::Sender<bool>) {
    let deadline = Instant::now() + spec.config.drain_timeout;
    loop {
        if in_flight.is_empty() {
            return;
        }
        match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(_) => {
                debug!(
                    "Pacer {} drain timeout; cancelling {} runs",
                    spec.journey_name,
                    in_flight.len()
                );
                let _ = cancel_tx.send(true);
                in_flight.abort_all();
                while in_flight.join_next().await.is_some() {}
                return;
            }
        }
    }
}

#[cfg(test)]
pub(super) mod test_support {
    /// Pure credit-accumulator step, factored out for the rate tests.
    pub fn credit_after(
        target_rps: f64,
        n_alive: usize,
        ramp_s: f64,
        tick_s: f64,
        duration_s: f64,
    ) -> f64 {
        let mut credit = 0.0;
        let mut launched = 0u64;
        let mut t = 0.0;
        while t < duration_s {
            let ramp = if ramp_s <= 0.0 {
                1.0
            } else {
                (t / ramp_s).clamp(0.0, 1.0)
            };
            credit += (target_rps / n_alive.max(1) as f64) * ramp * tick_s;
            while credit >= 1.0 {
                credit -= 1.0;
                launched += 1;
            }
            t += tick_s;
        }
        launched as f64
    }
}
