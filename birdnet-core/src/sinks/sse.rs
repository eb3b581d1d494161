//! Server-sent-events firehose (SPEC_FULL §4.8).
//!
//! Each connected browser is its own short-lived bus subscriber with the
//! `drop_oldest` overflow policy and a queue of 64 (SPEC_FULL §4.7/§4.8).
//! `axum::response::sse::Sse` handles the client-facing heartbeat; this
//! module only bridges the bus's custom [`crate::bus::BusReceiver`] into a
//! `Stream` axum can serve, via `tokio_stream::wrappers::ReceiverStream`
//! (the bus isn't itself a `Stream`, so a forwarding task is the simplest
//! bridge).

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::extract::State;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::debug;

use serde::Serialize;

use crate::bus::{EventBus, OverflowPolicy, TopicFilter};
use crate::model::{BusEvent, Detection};

const CLIENT_QUEUE_CAPACITY: usize = 64;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const IDLE_CLOSE_AFTER: Duration = Duration::from_secs(60);

/// Axum handler: `GET /events` streams every bus event as a JSON SSE
/// payload until the client disconnects or goes idle.
pub async fn sse_handler(State(bus): State<EventBus>) -> impl IntoResponse {
    let (id, bus_rx) = bus.subscribe("sse", TopicFilter::All, CLIENT_QUEUE_CAPACITY, OverflowPolicy::DropOldest);
    let (tx, rx) = tokio::sync::mpsc::channel(CLIENT_QUEUE_CAPACITY);

    tokio::spawn(async move {
        let mut last_send_ok = tokio::time::Instant::now();
        loop {
            let event = tokio::select! {
                e = bus_rx.recv() => match e {
                    Some(e) => e,
                    None => break,
                },
                _ = tokio::time::sleep(IDLE_CLOSE_AFTER.saturating_sub(last_send_ok.elapsed())) => {
                    debug!("sse client idle, closing");
                    break;
                }
            };
            let sse_event = to_sse_event(&event);
            if tx.send(Ok(sse_event)).await.is_err() {
                break;
            }
            last_send_ok = tokio::time::Instant::now();
        }
        bus.unsubscribe(id);
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL))
}

/// SSE wire payload for a detection (SPEC_FULL §6): a snake_case projection
/// of [`Detection`], not the stored model — operators consuming the
/// firehose never see internal fields like `verification` or `locked`.
#[derive(Serialize)]
struct DetectionSseEvent<'a> {
    id: uuid::Uuid,
    timestamp: chrono::DateTime<chrono::Utc>,
    species_code: &'a str,
    common_name: &'a str,
    scientific_name: &'a str,
    confidence: f32,
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    clip_url: Option<&'a str>,
}

impl<'a> From<&'a Detection> for DetectionSseEvent<'a> {
    fn from(d: &'a Detection) -> Self {
        Self {
            id: d.id,
            timestamp: d.detected_at,
            species_code: &d.species_code,
            common_name: &d.common_name,
            scientific_name: &d.scientific_name,
            confidence: d.confidence,
            source: &d.source_id,
            clip_url: d.clip_path.as_deref(),
        }
    }
}

fn to_sse_event(event: &BusEvent) -> Event {
    let data = match event {
        BusEvent::Detection(d) => {
            serde_json::to_string(&DetectionSseEvent::from(d.as_ref())).unwrap_or_default()
        }
        BusEvent::System(e) => serde_json::to_string(e).unwrap_or_default(),
    };
    Event::default().event(event.topic()).data(data)
}

pub type SseStream = ReceiverStream<Result<Event, Infallible>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LifecycleKind, SystemEvent, VerificationStatus};

    fn sample_detection() -> Detection {
        Detection {
            id: uuid::Uuid::nil(),
            source_id: "mic0".into(),
            begin: chrono::Utc::now(),
            end: chrono::Utc::now(),
            detected_at: chrono::Utc::now(),
            scientific_name: "Turdus migratorius".into(),
            common_name: "American Robin".into(),
            species_code: "amerob".into(),
            confidence: 0.85,
            clip_path: Some("clips/2026-07-29/amerob/foo.wav".into()),
            weather: None,
            time_of_day: None,
            verification: VerificationStatus::Unverified,
            locked: false,
            comments: vec![],
        }
    }

    #[test]
    fn detection_sse_payload_matches_spec_projection() {
        let detection = sample_detection();
        let json = serde_json::to_value(DetectionSseEvent::from(&detection)).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(
            obj.keys().cloned().collect::<std::collections::BTreeSet<_>>(),
            [
                "id",
                "timestamp",
                "species_code",
                "common_name",
                "scientific_name",
                "confidence",
                "source",
                "clip_url",
            ]
            .into_iter()
            .map(String::from)
            .collect()
        );
        assert_eq!(json["species_code"], "amerob");
        assert_eq!(json["source"], "mic0");
        assert_eq!(json["clip_url"], "clips/2026-07-29/amerob/foo.wav");
    }

    #[test]
    fn clip_url_omitted_when_no_clip_was_captured() {
        let mut detection = sample_detection();
        detection.clip_path = None;
        let json = serde_json::to_value(DetectionSseEvent::from(&detection)).unwrap();
        assert!(!json.as_object().unwrap().contains_key("clip_url"));
    }

    #[test]
    fn detection_event_carries_its_topic_as_the_sse_event_name() {
        let event = BusEvent::Detection(Box::new(sample_detection()));
        let sse_event = to_sse_event(&event);
        // `Event` doesn't expose its fields publicly; constructing one
        // without panicking is the behavior under test here.
        let _ = sse_event;
    }
}
