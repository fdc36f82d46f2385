//! User journey execution: the journey capability trait, the per-run context
//! that records request outcomes, and the runner that hosts one journey
//! instance on the shared worker pool.
mod http;
mod runner;


pub use http::HttpJourney;
pub use runner::{run_one, RunnerJob};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;

use crate::datapool::Row;
use crate::metrics::{labels, Metrics};

/// What happened to one request within a journey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Ok { status_code: Option<u16> },
    Error { kind: String },
}

impl OutcomeStatus {
    /// Coarse class used as the `status_class` label.
    #[must_use]
    pub fn status_class(&self) -> String {
        match self {
            OutcomeStatus::Ok { status_code: Some(code) } => format!("{}xx", code / 100),
            OutcomeStatus::Ok { status_code: None } => "ok".to_owned(),
            OutcomeStatus::Error { .. } => "error".to_owned(),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, OutcomeStatus::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub label: String,
    pub duration: Duration,
    pub status: OutcomeStatus,
}

/// An uncaught journey failure. Counted, never propagated past the runner.
#[derive(Debug, Clone)]
pub struct JourneyFailure {
    pub kind: String,
    pub message: String,
}

impl JourneyFailure {
    #[must_use]
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        JourneyFailure {
            kind: kind.to_owned(),
            message: message.into(),
        }
    }
}

impl fmt::Display for JourneyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// One user journey. Implementations execute a single iteration, record each
/// request outcome through the context, and return early at their next yield
/// point once the context is cancelled.
#[async_trait]
pub trait Journey: Send + Sync {
    async fn execute(&self, row: Option<Row>, ctx: &JourneyContext) -> Result<(), JourneyFailure>;
}

/// Per-run capability handle: scoped labels, the metrics registry, the shared
/// HTTP client and the cancellation signal.
#[derive(Clone)]
pub struct JourneyContext {
    scenario: String,
    journey: String,
    metrics: Metrics,
    http: reqwest::Client,
    request_timeout: Duration,
    cancel: watch::Receiver<bool>,
}

impl JourneyContext {
    #[must_use]
    pub fn new(
        scenario: String,
        journey: String,
        metrics: Metrics,
        http: reqwest::Client,
        request_timeout: Duration,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        JourneyContext {
            scenario,
            journey,
            metrics,
            http,
            request_timeout,
            cancel,
        }
    }

    #[must_use]
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    #[must_use]
    pub fn journey(&self) -> &str {
        &self.journey
    }

    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves when the run is cancelled. A closed channel counts as
    /// cancelled.
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        loop {
            if *cancel.borrow() {
                return;
            }
            if cancel.changed().await.is_err() {
                return;
            }
        }
    }

    /// Record one request outcome into the metrics core.
    pub fn record(&self, outcome: &RequestOutcome) {
        let status_class = outcome.status.status_class();
        let base = labels([
            ("scenario", self.scenario.as_str()),
            ("journey", self.journey.as_str()),
            ("label", outcome.label.as_str()),
        ]);
        let mut request_labels = base.clone();
        request_labels.insert("status_class".to_owned(), status_class.clone());
        self.metrics.inc("http_requests_total", &request_labels);

        if let OutcomeStatus::Error { kind } = &outcome.status {
            let mut error_labels = base.clone();
            error_labels.insert("kind".to_owned(), kind.clone());
            self.metrics.inc("http_errors_total", &error_labels);
        }

        self.metrics.observe(
            "http_request_duration_seconds",
            &base,
            outcome.duration.as_secs_f64(),
        );
        self.metrics.record_event(
            "http_request",
            json!({
                "label": outcome.label,
                "duration_s": outcome.duration.as_secs_f64(),
                "status_class": status_class,
            }),
        );
    }
}
