//! Detection sinks (SPEC_FULL §4.8): persistence, push notifications, and
//! the two pull surfaces (SSE firehose, Prometheus scrape).
//!
//! Every push sink subscribes to the bus's `detection.new` topic directly
//! with its own bounded queue and overflow policy — failures in one sink
//! never backpressure the bus or another sink beyond that subscriber's own
//! queue (SPEC_FULL §4.7/§4.8).

pub mod birdweather;
pub mod mqtt;
pub mod persistence;
pub mod prometheus;
pub mod shoutrrr;
pub mod sse;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::bus::{EventBus, OverflowPolicy, TopicFilter};
use crate::config::SinkSettings;
use crate::error::Result;
use crate::model::{BusEvent, Detection};

use persistence::PersistenceSink;

/// Bridges a bus subscription carrying mixed `BusEvent`s into a sink's own
/// `Detection`-typed channel, dropping non-detection events.
fn forward_detections(
    name: &str,
    bus: EventBus,
    cancel: CancellationToken,
    queue_capacity: usize,
) -> mpsc::Receiver<Detection> {
    let (tx, rx) = mpsc::channel(queue_capacity);
    let (sub_id, bus_rx) = bus.subscribe(
        name.to_string(),
        TopicFilter::Exact("detection.new".into()),
        queue_capacity,
        OverflowPolicy::DropOldest,
    );
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                e = bus_rx.recv() => match e {
                    Some(e) => e,
                    None => break,
                },
            };
            if let BusEvent::Detection(detection) = event {
                if tx.send(*detection).await.is_err() {
                    break;
                }
            }
        }
        bus.unsubscribe(sub_id);
    });
    rx
}

/// Handles to the running sink tasks, owned by the supervisor for
/// shutdown-ordering purposes (SPEC_FULL §4.10).
pub struct Sinks {
    pub persistence: Arc<PersistenceSink>,
}

/// Spawns every sink configured in `settings`, wiring each to its own bus
/// subscription. Returns the persistence sink handle (needed by the
/// watchdog to flip it into read-only mode) plus join handles the
/// supervisor awaits on shutdown.
pub fn spawn_all(
    settings: &SinkSettings,
    bus: EventBus,
    cancel: CancellationToken,
) -> Result<(Sinks, Vec<tokio::task::JoinHandle<()>>)> {
    let mut handles = Vec::new();

    let persistence = Arc::new(PersistenceSink::open(settings.sqlite_path.clone())?);
    {
        let persistence = persistence.clone();
        let rx = forward_detections("persistence", bus.clone(), cancel.clone(), settings.sink_queue_capacity);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { persistence.run(rx, cancel).await }));
    }

    if let Some(mqtt_settings) = &settings.mqtt {
        let (sink, mut eventloop) = mqtt::MqttSink::connect(mqtt_settings);
        let rx = forward_detections("mqtt", bus.clone(), cancel.clone(), settings.sink_queue_capacity);
        let cancel2 = cancel.clone();
        handles.push(tokio::spawn(async move { sink.run(rx, cancel2).await }));
        handles.push(tokio::spawn(async move {
            loop {
                if let Err(e) = eventloop.poll().await {
                    warn!(error = %e, "mqtt event loop error");
                    break;
                }
            }
        }));
    }

    if let Some(bw_settings) = &settings.birdweather {
        let sink = birdweather::BirdWeatherSink::new(bw_settings);
        let rx = forward_detections("birdweather", bus.clone(), cancel.clone(), settings.sink_queue_capacity);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { sink.run(rx, cancel).await }));
    }

    if let Some(sh_settings) = &settings.shoutrrr {
        let sink = shoutrrr::ShoutrrrSink::new(sh_settings);
        let rx = forward_detections("shoutrrr", bus.clone(), cancel.clone(), settings.sink_queue_capacity);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { sink.run(rx, cancel).await }));
    }

    Ok((Sinks { persistence }, handles))
}
