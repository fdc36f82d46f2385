use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OwnedSemaphorePermit;
use tracing::warn;

use crate::datapool::{Datapool, RowFetch};
use crate::metrics::labels;

use super::{Journey, JourneyContext};

/// Everything one journey run needs; built by the pacer at launch time.
pub struct RunnerJob {
    pub journey: Arc<dyn Journey>,
    pub datapool: Option<Datapool>,
    pub ctx: JourneyContext,
}

/// Host one journey instance. Failures are counted, never propagated; the
/// permit pins one slot of the shared worker pool for the duration.
pub async fn run_one(job: RunnerJob, permit: OwnedSemaphorePermit) {
    let _slot = permit;
    let ctx = &job.ctx;
    let journey_labels = labels([
        ("scenario", ctx.scenario()),
        ("journey", ctx.journey()),
    ]);

    let row = match &job.datapool {
        None => None,
        Some(pool) => match pool.next_row().await {
            RowFetch::Row(row) => Some(row),
            RowFetch::Exhausted => {
                // The scheduled start silently evaporates; only the counter
                // records it.
                ctx.metrics().inc("datapool_exhausted_total", &journey_labels);
                return;
            }
        },
    };

    let started = Instant::now();
    let result = job.journey.execute(row, ctx).await;
    let duration = started.elapsed().as_secs_f64();

    let metrics = ctx.metrics();
    metrics.inc("journey_executions_total", &journey_labels);
    metrics.observe("journey_duration_seconds", &journey_labels, duration);
    if let Err(failure) = result {
        let mut failure_labels = journey_labels.clone();
        failure_labels.insert("kind".to_owned(), failure.kind.clone());
        metrics.inc("journey_failures_total", &failure_labels);
        warn!("Journey {} failed: {}", ctx.journey(), failure);
    }
}
