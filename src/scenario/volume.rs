use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::args::PositiveF64;

/// Declarative, cluster-wide rate target for one journey. Each node consumes
/// `target_rps / n_alive`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeModel {
    pub target_rps: PositiveF64,
    pub duration_s: PositiveF64,
    #[serde(default)]
    pub ramp_s: f64,
}

impl VolumeModel {
    #[must_use]
    pub fn new(target_rps: PositiveF64, duration_s: PositiveF64, ramp_s: f64) -> Self {
        VolumeModel {
            target_rps,
            duration_s,
            ramp_s: ramp_s.max(0.0),
        }
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_s.get())
    }

    /// Linear ramp: `min(1, t / ramp_s)`, or 1 when no ramp is configured.
    #[must_use]
    pub fn ramp_factor(&self, t_eff_s: f64) -> f64 {
        if self.ramp_s <= 0.0 {
            return 1.0;
        }
        (t_eff_s / self.ramp_s).clamp(0.0, 1.0)
    }

    /// Instantaneous per-node rate at `t_eff_s` for an alive-set of `n_alive`.
    #[must_use]
    pub fn rate_per_node(&self, n_alive: usize, t_eff_s: f64) -> f64 {
        let nodes = n_alive.max(1) as f64;
        (self.target_rps.get() / nodes) * self.ramp_factor(t_eff_s)
    }

    #[must_use]
    pub fn is_complete(&self, t_eff_s: f64) -> bool {
        t_eff_s >= self.duration_s.get()
    }
}
