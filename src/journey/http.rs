use std::time::Instant;

use async_trait::async_trait;

use crate::datapool::Row;

use super::{Journey, JourneyContext, JourneyFailure, OutcomeStatus, RequestOutcome};

/// Built-in journey: one GET per iteration. A datapool row, when present, is
/// appended to the base URL as a path or query suffix, so a pool of paths
/// turns one journey into a URL sweep.
#[derive(Debug, Clone)]
pub struct HttpJourney {
    pub label: String,
    pub base_url: String,
}

impl HttpJourney {
    #[must_use]
    pub fn new(label: &str, base_url: &str) -> Self {
        HttpJourney {
            label: label.to_owned(),
            base_url: base_url.to_owned(),
        }
    }

    pub(super) fn target_url(&self, row: Option<&Row>) -> String {
        match row {
            None => self.base_url.clone(),
            Some(suffix) if suffix.starts_with('/') || suffix.starts_with('?') => {
                format!("{}{}", self.base_url.trim_end_matches('/'), suffix)
            }
            Some(suffix) => format!("{}/{}", self.base_url.trim_end_matches('/'), suffix),
        }
    }
}

#[async_trait]
impl Journey for HttpJourney {
    async fn execute(&self, row: Option<Row>, ctx: &JourneyContext) -> Result<(), JourneyFailure> {
        if ctx.is_cancelled() {
            return Ok(());
        }
        let url = self.target_url(row.as_ref());
        let started = Instant::now();
        let request = ctx
            .http()
            .get(&url)
            .timeout(ctx.request_timeout())
            .send();

        let response = tokio::select! {
            response = request => response,
            // Dropping the request future aborts it at the connection level.
            () = ctx.cancelled() => return Ok(()),
        };

        let status = match response {
            Ok(response) => {
                let code = response.status().as_u16();
                // Drain the body so the connection can be reused; a failure
                // here is a transport error outcome, not a journey failure.
                match response.bytes().await {
                    Ok(_) => OutcomeStatus::Ok {
                        status_code: Some(code),
                    },
                    Err(_) => OutcomeStatus::Error {
                        kind: "body_read".to_owned(),
                    },
                }
            }
            Err(err) if err.is_timeout() => OutcomeStatus::Error {
                kind: "timeout".to_owned(),
            },
            Err(err) if err.is_connect() => OutcomeStatus::Error {
                kind: "connect".to_owned(),
            },
            Err(_) => OutcomeStatus::Error {
                kind: "transport".to_owned(),
            },
        };

        ctx.record(&RequestOutcome {
            label: self.label.clone(),
            duration: started.elapsed(),
            status,
        });
        Ok(())
    }
}
