//! BirdWeather push sink (SPEC_FULL §4.8). A thin `reqwest` HTTP client, the
//! same shape as [`super::shoutrrr`] — both sinks push a detection to a
//! single webhook-style endpoint and differ only in payload and auth.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::HttpSinkSettings;
use crate::error::SinkOutcome;
use crate::model::Detection;

pub struct BirdWeatherSink {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl BirdWeatherSink {
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

    async fn push_one(&self, detection: &Detection) -> SinkOutcome {
        let mut request = self.client.post(&self.endpoint).json(&BirdWeatherPayload::from(detection));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(resp) if resp.status().is_success() => SinkOutcome::Ok,
            Ok(resp) if resp.status().is_client_error() => {
                warn!(status = %resp.status(), "birdweather rejected payload");
                SinkOutcome::Fatal
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "birdweather transient error");
                SinkOutcome::Retryable
            }
            Err(e) => {
                warn!(error = %e, "birdweather request failed");
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
        info!("birdweather sink stopped");
    }
}

#[derive(serde::Serialize)]
struct BirdWeatherPayload<'a> {
    #[serde(rename = "sciName")]
    sci_name: &'a str,
    #[serde(rename = "commonName")]
    common_name: &'a str,
    confidence: f32,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl<'a> From<&'a Detection> for BirdWeatherPayload<'a> {
    fn from(d: &'a Detection) -> Self {
        Self {
            sci_name: &d.scientific_name,
            common_name: &d.common_name,
            confidence: d.confidence,
            timestamp: d.detected_at,
        }
    }
}
