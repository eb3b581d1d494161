//! Shoutrrr-style notification sink (SPEC_FULL §4.8): posts a short
//! human-readable message to a configured webhook URL. Same client shape as
//! [`super::birdweather`].

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::HttpSinkSettings;
use crate::error::SinkOutcome;
use crate::model::Detection;

pub struct ShoutrrrSink {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl ShoutrrrSink {
    pub fn new(settings: &HttpSinkSettings) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            endpoint: settings.endpoint.clone(),
            token: settings.token.clone(),
        }
    }

    fn message_for(detection: &Detection) -> String {
        format!(
            "{} ({}) detected on {} at {:.0}% confidence",
            detection.common_name,
            detection.scientific_name,
            detection.source_id,
            detection.confidence * 100.0
        )
    }

    async fn push_one(&self, detection: &Detection) -> SinkOutcome {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "message": Self::message_for(detection) }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(resp) if resp.status().is_success() => SinkOutcome::Ok,
            Ok(resp) if resp.status().is_client_error() => {
                warn!(status = %resp.status(), "shoutrrr endpoint rejected message");
                SinkOutcome::Fatal
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "shoutrrr transient error");
                SinkOutcome::Retryable
            }
            Err(e) => {
                warn!(error = %e, "shoutrrr request failed");
                SinkOutcome::Retryable
            }
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<Detection>, cancel: CancellationToken) {
        loop {
            let detection = tokio::select! {
                _ = cancel.cancelled() => break,
                d = rx.recv() => match d {
                    Some(d) => d,
                    None => break,
                },
            };
            if matches!(self.push_one(&detection).await, SinkOutcome::Retryable) {
                let _ = self.push_one(&detection).await;
            }
        }
        info!("shoutrrr sink stopped");
    }
}
