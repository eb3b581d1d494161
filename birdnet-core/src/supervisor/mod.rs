//! Pipeline supervisor (SPEC_FULL §4.10): builds every stage from a
//! [`Settings`] snapshot, starts them in dependency order, and tears the
//! whole tree down — in reverse, with per-stage deadlines — on a shutdown
//! signal or a fatal escalation from the inferencer or the bus.
//!
//! Grounded on the teacher's `DictumEngine::start`/`stop`
//! (`dictum-core/src/engine/mod.rs`): one owner holding every task handle and
//! driving startup/shutdown explicitly. Generalized from a single audio
//! engine to the multi-stage pipeline tree, and from the teacher's single
//! `Arc<AtomicBool>` running flag to a hierarchical
//! `tokio_util::sync::CancellationToken` (SPEC_FULL §5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{EventBus, OverflowPolicy, TopicFilter};
use crate::clip::ClipWriter;
use crate::config::{Settings, SourceSettings};
use crate::error::{BirdnetError, Result};
use crate::inference::stub::StubClassifier;
use crate::inference::{worker_loop, Classifier, ClassifierHandle, InferenceDiagnostics};
use crate::model::{BusEvent, LifecycleKind, Prediction, ResourceLevel, SystemEvent};
use crate::postfilter::{ClipRequest, PostFilter};
use crate::queue::DropOldestQueue;
use crate::ring::{required_capacity_bytes, RingBuffer, RingWriter};
use crate::sinks::{self, prometheus::metric_names, Sinks};
use crate::source::local::LocalSource;
use crate::source::rtsp::RtspSource;
use crate::source::Source;
use crate::watchdog::Watchdog;
use crate::windower::{Windower, WindowerDiagnostics};
use crate::AudioFrame;

#[cfg(feature = "onnx")]
use crate::inference::onnx::{OnnxClassifier, OnnxClassifierConfig};

/// State the supervisor keeps per configured source for the clip manager and
/// metrics sampler, once the source's ring and frame queue have been built.
struct SourceRuntime {
    ring: RingBuffer,
    sample_rate: u32,
    frame_queue: Arc<DropOldestQueue<AudioFrame>>,
}

/// Owns the full pipeline for one run. Construct with [`Supervisor::new`],
/// drive with [`Supervisor::run`].
pub struct Supervisor {
    settings: Settings,
    bus: EventBus,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            bus: EventBus::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Cheap handle to the bus this supervisor will run, so a caller can
    /// subscribe before (or instead of) calling `run()`.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Runs the full pipeline until a shutdown signal (SIGINT/SIGTERM) is
    /// received or a fatal condition escalates (classifier load failure,
    /// the inferencer or bus exiting unexpectedly). Returns `Ok(())` for a
    /// clean signal-driven shutdown, `Err` otherwise (SPEC_FULL §6 exit
    /// code `1`).
    pub async fn run(self) -> Result<()> {
        let Supervisor {
            settings,
            bus,
            cancel,
        } = self;

        // Classifier warm-up happens before anything else is spawned: a
        // failure here (`classifier_load_failed`, SPEC_FULL §7) means
        // nothing needs tearing down yet.
        let classifier = build_classifier(&settings.inference)?;
        classifier
            .0
            .lock()
            .warm_up()
            .map_err(|e| BirdnetError::Other(anyhow::anyhow!("classifier warm-up failed: {e}")))?;

        let (fatal_tx, mut fatal_rx) = mpsc::channel::<String>(8);

        publish_lifecycle(&bus, LifecycleKind::Start, "supervisor", None).await;

        // --- sinks (includes persistence) ---
        let (sinks, sink_handles) = sinks::spawn_all(&settings.sinks, bus.clone(), cancel.clone())?;

        // --- watchdog ---
        let watchdog = Arc::new(Watchdog::new(
            settings.watchdog.clone(),
            bus.clone(),
            Some(sinks.persistence.clone()),
        ));
        let watchdog_handle = spawn_guarded("watchdog", fatal_tx.clone(), cancel.clone(), {
            let watchdog = watchdog.clone();
            let cancel = cancel.clone();
            async move { watchdog.run(cancel).await }
        });

        // --- postfilter ---
        let postfilter = Arc::new(PostFilter::new(settings.postfilter.clone(), bus.clone()));
        let (prediction_tx, prediction_rx) =
            mpsc::channel::<Prediction>(settings.inference.worker_threads.max(1) * 4);
        let (clip_tx, clip_rx) = if settings.clip.enabled {
            let (tx, rx) = mpsc::channel::<ClipRequest>(settings.clip.queue_capacity);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let postfilter_handle = spawn_guarded("postfilter", fatal_tx.clone(), cancel.clone(), {
            let postfilter = postfilter.clone();
            let cancel = cancel.clone();
            async move { postfilter.run(prediction_rx, clip_tx, cancel).await }
        });
        let sweeper_handle = spawn_guarded("postfilter_sweeper", fatal_tx.clone(), cancel.clone(), {
            let postfilter = postfilter.clone();
            let cancel = cancel.clone();
            async move { postfilter.run_sweeper(cancel).await }
        });

        // --- inference worker pool (SPEC_FULL §4.4: shared queue, capacity
        // 2 * worker_threads) ---
        let worker_threads = settings.inference.worker_threads.max(1);
        let shared_queue: Arc<DropOldestQueue<AudioFrame>> =
            Arc::new(DropOldestQueue::new(worker_threads * 2));
        let inference_diagnostics = Arc::new(InferenceDiagnostics::default());
        let mut inference_handles = Vec::with_capacity(worker_threads);
        for worker_id in 0..worker_threads {
            let queue = shared_queue.clone();
            let classifier = classifier.clone();
            let out = prediction_tx.clone();
            let diagnostics = inference_diagnostics.clone();
            let bus_for_error = bus.clone();
            let on_error: Arc<dyn Fn(String) + Send + Sync> = Arc::new(move |msg: String| {
                let bus = bus_for_error.clone();
                tokio::spawn(async move {
                    publish_lifecycle(&bus, LifecycleKind::Error, "inference", Some(msg)).await;
                });
            });
            let cancel_worker = cancel.clone();
            inference_handles.push(spawn_guarded(
                "inference_worker",
                fatal_tx.clone(),
                cancel.clone(),
                async move {
                    worker_loop(worker_id, queue, classifier, out, diagnostics, on_error, cancel_worker).await
                },
            ));
        }
        drop(prediction_tx);

        // --- per source: ring, windower, forwarder into the shared queue,
        // source adapter, silence watchdog ---
        let mut source_runtimes: HashMap<String, SourceRuntime> = HashMap::new();
        let mut source_handles = Vec::with_capacity(settings.sources.len());
        let mut forward_handles = Vec::with_capacity(settings.sources.len());
        let mut windower_handles = Vec::with_capacity(settings.sources.len());

        let clip_capture_duration = crate::clip::capture_duration(&settings.clip);
        for source_settings in &settings.sources {
            let id = source_settings.id().to_string();
            let capacity = required_capacity_bytes(
                settings.window.window_duration,
                clip_capture_duration,
                settings.window.sample_rate,
                settings.ring.safety_factor,
            );
            let ring = RingBuffer::new(capacity, settings.window.sample_rate);
            let cursor = ring.reader();
            let writer = ring.writer();

            let frame_queue: Arc<DropOldestQueue<AudioFrame>> =
                Arc::new(DropOldestQueue::new(settings.window.frame_queue_capacity));
            let windower_diagnostics = Arc::new(WindowerDiagnostics::default());
            let windower = Windower::new(id.clone(), &settings.window);
            windower_handles.push(spawn_guarded("windower", fatal_tx.clone(), cancel.clone(), {
                let frame_queue = frame_queue.clone();
                let cancel = cancel.clone();
                async move { windower.run(cursor, frame_queue, windower_diagnostics, cancel).await }
            }));

            // Per-source frame queue (§4.3, the per-source `inference_lag_drops`
            // basis) feeds into the single shared inferencer queue (§4.4) through
            // a small forwarding task, reusing `DropOldestQueue` for both hops.
            forward_handles.push({
                let frame_queue = frame_queue.clone();
                let shared_queue = shared_queue.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let frame = tokio::select! {
                            _ = cancel.cancelled() => break,
                            f = frame_queue.pop() => f,
                        };
                        shared_queue.push(frame);
                    }
                })
            });

            source_handles.push(spawn_source(
                build_source(source_settings, settings.window.sample_rate),
                writer,
                ring.clone(),
                settings.ring.source_silence_timeout,
                bus.clone(),
                cancel.clone(),
            ));

            source_runtimes.insert(
                id,
                SourceRuntime {
                    ring,
                    sample_rate: settings.window.sample_rate,
                    frame_queue,
                },
            );
        }

        // --- clip manager ---
        let clip_writer = Arc::new(ClipWriter::new(settings.clip.clone()));
        let clip_suppressed_total = Arc::new(AtomicU64::new(0));
        let clip_handle = clip_rx.map(|mut clip_rx| {
            let clip_writer = clip_writer.clone();
            let persistence = sinks.persistence.clone();
            let watchdog = watchdog.clone();
            let clip_suppressed_total = clip_suppressed_total.clone();
            let rings: HashMap<String, (RingBuffer, u32)> = source_runtimes
                .iter()
                .map(|(id, rt)| (id.clone(), (rt.ring.clone(), rt.sample_rate)))
                .collect();
            let cancel = cancel.clone();
            spawn_guarded("clip_manager", fatal_tx.clone(), cancel.clone(), async move {
                loop {
                    let request = tokio::select! {
                        _ = cancel.cancelled() => break,
                        r = clip_rx.recv() => match r {
                            Some(r) => r,
                            None => break,
                        },
                    };
                    if watchdog.clip_suppressed() {
                        clip_suppressed_total.fetch_add(1, Ordering::Relaxed);
                        metrics::gauge!(metric_names::CLIP_SUPPRESSED_DISK_PRESSURE_TOTAL)
                            .set(clip_suppressed_total.load(Ordering::Relaxed) as f64);
                        continue;
                    }
                    if !clip_writer.should_capture(&request.species_code) {
                        continue;
                    }
                    let Some((ring, sample_rate)) = rings.get(&request.source_id) else {
                        continue;
                    };
                    match clip_writer
                        .capture(
                            ring,
                            *sample_rate,
                            &request.source_id,
                            &request.species_code,
                            request.confidence,
                            request.detected_at,
                        )
                        .await
                    {
                        Ok(path) => persistence.update_clip_path(request.detection_id, path).await,
                        Err(e) => warn!(source_id = %request.source_id, error = %e, "clip capture failed"),
                    }
                }
            })
        });

        // --- metrics bridge + periodic sampler ---
        let metrics_handle = spawn_metrics_bridge(bus.clone(), cancel.clone());
        let sampler_sources: Vec<(String, RingBuffer, Arc<DropOldestQueue<AudioFrame>>)> = source_runtimes
            .into_iter()
            .map(|(id, rt)| (id, rt.ring, rt.frame_queue))
            .collect();
        let sampler_handle = spawn_metrics_sampler(
            sampler_sources,
            inference_diagnostics.clone(),
            postfilter.diagnostics.clone(),
            cancel.clone(),
        );

        // --- HTTP surface: SSE firehose and/or Prometheus scrape, one axum
        // server on the configured listen address (SPEC_FULL §4.8/§6) ---
        let prometheus_handle = if settings.sinks.prometheus_enabled {
            Some(sinks::prometheus::install_recorder()?)
        } else {
            None
        };
        let http_handle = spawn_http_server(&settings, bus.clone(), prometheus_handle, fatal_tx.clone(), cancel.clone());

        // --- wait for shutdown signal or fatal escalation ---
        let fatal = tokio::select! {
            _ = shutdown_signal() => None,
            reason = fatal_rx.recv() => reason,
        };
        if let Some(reason) = &fatal {
            error!(reason = %reason, "fatal condition, shutting down");
        }

        cancel.cancel();
        publish_lifecycle(&bus, LifecycleKind::Stop, "supervisor", fatal.clone()).await;

        // --- reverse-order shutdown with per-stage deadlines ---
        let mut clean = fatal.is_none();
        clean &= join_group_with_deadline("sources", source_handles, settings.shutdown.source).await;
        clean &= join_group_with_deadline("source_forwarders", forward_handles, settings.shutdown.source).await;
        clean &= join_group_with_deadline("windowers", windower_handles, settings.shutdown.source).await;

        clean &= join_group_with_deadline("inference_workers", inference_handles, settings.shutdown.inferencer).await;
        clean &= join_with_deadline("postfilter", postfilter_handle, settings.shutdown.inferencer).await;
        clean &= join_with_deadline("postfilter_sweeper", sweeper_handle, settings.shutdown.bus).await;
        if let Some(h) = clip_handle {
            clean &= join_with_deadline("clip_manager", h, settings.shutdown.bus).await;
        }

        clean &= join_with_deadline("watchdog", watchdog_handle, settings.shutdown.bus).await;
        clean &= join_with_deadline("metrics_bridge", metrics_handle, settings.shutdown.bus).await;
        clean &= join_with_deadline("metrics_sampler", sampler_handle, settings.shutdown.bus).await;
        if let Some(h) = http_handle {
            clean &= join_with_deadline("http_server", h, settings.shutdown.bus).await;
        }

        clean &= join_group_with_deadline("sinks", sink_handles, settings.shutdown.persistence).await;

        bus.drain(settings.shutdown.bus).await;

        if clean {
            info!("supervisor shut down cleanly");
            Ok(())
        } else {
            Err(BirdnetError::Other(anyhow::anyhow!(
                fatal.unwrap_or_else(|| "shutdown deadline exceeded".to_string())
            )))
        }
    }
}

fn build_classifier(settings: &crate::config::InferenceSettings) -> Result<ClassifierHandle> {
    #[cfg(feature = "onnx")]
    {
        if let Some(path) = &settings.model_path {
            let mut config = OnnxClassifierConfig::new(path.clone());
            if let Some(parent) = path.parent() {
                let candidate = parent.join("labels.txt");
                if candidate.exists() {
                    config.labels_path = Some(candidate);
                }
            }
            return Ok(ClassifierHandle::new(OnnxClassifier::new(config)));
        }
    }
    Ok(ClassifierHandle::new(StubClassifier::default()))
}

fn build_source(settings: &SourceSettings, sample_rate: u32) -> Box<dyn Source> {
    match settings {
        SourceSettings::Local { id, device } => {
            Box::new(LocalSource::new(id.clone(), device.clone(), sample_rate))
        }
        SourceSettings::Rtsp { id, url, transport } => {
            Box::new(RtspSource::new(id.clone(), url.clone(), *transport, sample_rate))
        }
    }
}

/// Owns one source's restart loop: each attempt gets a fresh child
/// cancellation token and its own silence watchdog polling
/// `RingBuffer::total_written()` (SPEC_FULL §4.2's restart-on-silence
/// requirement). The source adapter itself already loops internally on
/// recoverable errors (backoff); this loop only restarts it when it returns
/// (clean stop, unrecoverable error, or a silence-triggered cancel) and the
/// root token is still live.
fn spawn_source(
    mut source: Box<dyn Source>,
    writer: RingWriter,
    ring: RingBuffer,
    silence_timeout: Duration,
    bus: EventBus,
    root_cancel: CancellationToken,
) -> JoinHandle<()> {
    let id = source.id().to_string();
    tokio::spawn(async move {
        while !root_cancel.is_cancelled() {
            let attempt_cancel = root_cancel.child_token();

            let silence_ring = ring.clone();
            let silence_cancel = attempt_cancel.clone();
            let silence_id = id.clone();
            let silence_bus = bus.clone();
            let silence_handle = tokio::spawn(async move {
                watch_silence(&silence_ring, silence_timeout, silence_cancel.clone()).await;
                if !silence_cancel.is_cancelled() {
                    warn!(source_id = %silence_id, "no audio heartbeat, restarting source");
                    publish_lifecycle(
                        &silence_bus,
                        LifecycleKind::Error,
                        &format!("source:{silence_id}"),
                        Some("source_silence_timeout".into()),
                    )
                    .await;
                    silence_cancel.cancel();
                }
            });

            metrics::gauge!(metric_names::SOURCE_UP, "source" => id.clone()).set(1.0);
            if let Err(e) = source.start(writer.clone(), attempt_cancel.clone()).await {
                warn!(source_id = %id, error = %e, "source adapter returned an error");
            }
            metrics::gauge!(metric_names::SOURCE_UP, "source" => id.clone()).set(0.0);
            attempt_cancel.cancel();
            let _ = silence_handle.await;
        }
    })
}

/// Returns once `cancel` fires (normal shutdown/restart) or once
/// `ring.total_written()` has not advanced for `timeout` (silence).
async fn watch_silence(ring: &RingBuffer, timeout: Duration, cancel: CancellationToken) {
    let mut last_total = ring.total_written();
    let mut last_change = tokio::time::Instant::now();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
        let total = ring.total_written();
        if total != last_total {
            last_total = total;
            last_change = tokio::time::Instant::now();
        } else if last_change.elapsed() >= timeout {
            return;
        }
    }
}

fn spawn_guarded<F>(
    name: &'static str,
    fatal_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    fut: F,
) -> JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        fut.await;
        if !cancel.is_cancelled() {
            let _ = fatal_tx.send(format!("{name} exited unexpectedly")).await;
        }
    })
}

async fn join_with_deadline(label: &'static str, handle: JoinHandle<()>, deadline: Duration) -> bool {
    match tokio::time::timeout(deadline, handle).await {
        Ok(_) => true,
        Err(_) => {
            error!(stage = label, "shutdown_deadline_exceeded");
            false
        }
    }
}

async fn join_group_with_deadline(label: &'static str, handles: Vec<JoinHandle<()>>, deadline: Duration) -> bool {
    let all = async {
        for handle in handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(deadline, all).await.is_err() {
        error!(stage = label, "shutdown_deadline_exceeded");
        false
    } else {
        true
    }
}

async fn publish_lifecycle(bus: &EventBus, kind: LifecycleKind, component: &str, cause: Option<String>) {
    bus.publish(BusEvent::System(Box::new(SystemEvent::Lifecycle {
        kind,
        component: component.to_string(),
        cause,
        timestamp: chrono::Utc::now(),
    })))
    .await;
}

fn spawn_metrics_bridge(bus: EventBus, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (id, rx) = bus.subscribe("metrics_bridge", TopicFilter::All, 256, OverflowPolicy::DropOldest);
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                e = rx.recv() => match e {
                    Some(e) => e,
                    None => break,
                },
            };
            record_event_metrics(&event);
        }
        bus.unsubscribe(id);
    })
}

fn record_event_metrics(event: &BusEvent) {
    match event {
        BusEvent::Detection(d) => {
            metrics::counter!(
                metric_names::DETECTIONS_TOTAL,
                "species" => d.species_code.clone(),
                "source" => d.source_id.clone(),
            )
            .increment(1);
        }
        BusEvent::System(e) => match e.as_ref() {
            SystemEvent::Resource { resource, level, .. } => {
                metrics::gauge!(metric_names::RESOURCE_LEVEL, "resource" => resource.clone())
                    .set(resource_level_value(*level));
            }
            SystemEvent::ThresholdChanged { species, new_level, .. } => {
                metrics::gauge!(metric_names::DYNAMIC_THRESHOLD_LEVEL, "species" => species.clone())
                    .set(*new_level as f64);
            }
            SystemEvent::Lifecycle { .. } => {}
        },
    }
}

fn resource_level_value(level: ResourceLevel) -> f64 {
    match level {
        ResourceLevel::Ok => 0.0,
        ResourceLevel::Warning => 1.0,
        ResourceLevel::Critical => 2.0,
    }
}

const METRICS_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Periodically publishes the per-source and aggregate gauges/histograms
/// that only the supervisor has the handles for (ring/queue diagnostics live
/// per-source, not in a single global).
fn spawn_metrics_sampler(
    sources: Vec<(String, RingBuffer, Arc<DropOldestQueue<AudioFrame>>)>,
    inference_diagnostics: Arc<InferenceDiagnostics>,
    postfilter_diagnostics: Arc<crate::postfilter::PostFilterDiagnostics>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(METRICS_SAMPLE_INTERVAL) => {}
            }
            for (id, ring, frame_queue) in &sources {
                metrics::gauge!(metric_names::RING_DROPPED_BYTES_TOTAL, "source" => id.clone())
                    .set(ring.dropped_total() as f64);
                metrics::gauge!(metric_names::INFERENCE_LAG_DROPS_TOTAL, "source" => id.clone())
                    .set(frame_queue.dropped_total() as f64);
            }
            metrics::gauge!(metric_names::INFERENCE_ERRORS_TOTAL)
                .set(inference_diagnostics.inference_errors.load(Ordering::Relaxed) as f64);
            for secs in inference_diagnostics.inference_seconds_total.lock().drain(..) {
                metrics::histogram!(metric_names::INFERENCE_SECONDS).record(secs);
            }
            metrics::gauge!(metric_names::PRIVACY_SUPPRESSED_TOTAL)
                .set(postfilter_diagnostics.privacy_suppressed.load(Ordering::Relaxed) as f64);
        }
    })
}

/// Mounts `/events` (SSE) and/or `/metrics` (Prometheus) on one axum server
/// bound to `settings.sinks.prometheus_listen`, when either is enabled.
/// Both handlers carry different `State` types, so each is built as its own
/// `Router<()>` via `.with_state()` before merging (SPEC_FULL §4.8).
fn spawn_http_server(
    settings: &Settings,
    bus: EventBus,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
    fatal_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    let mut routers = Vec::new();
    if settings.sinks.sse_enabled {
        routers.push(
            axum::Router::new()
                .route("/events", axum::routing::get(sinks::sse::sse_handler))
                .with_state(bus),
        );
    }
    if let Some(handle) = prometheus_handle {
        routers.push(
            axum::Router::new()
                .route("/metrics", axum::routing::get(sinks::prometheus::metrics_handler))
                .with_state(handle),
        );
    }
    if routers.is_empty() {
        return None;
    }

    let app = routers.into_iter().fold(axum::Router::new(), |app, r| app.merge(r));
    let addr = settings.sinks.prometheus_listen.clone();
    Some(spawn_guarded("http_server", fatal_tx, cancel.clone(), async move {
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    result = axum::serve(listener, app) => {
                        if let Err(e) = result {
                            error!(error = %e, "http server error");
                        }
                    }
                }
            }
            Err(e) => error!(error = %e, addr, "failed to bind http listen address"),
        }
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_level_values_are_ordered() {
        assert!(resource_level_value(ResourceLevel::Ok) < resource_level_value(ResourceLevel::Warning));
        assert!(resource_level_value(ResourceLevel::Warning) < resource_level_value(ResourceLevel::Critical));
    }

    #[tokio::test]
    async fn watch_silence_returns_when_ring_stagnates() {
        let ring = RingBuffer::new(1024, 8_000);
        let cancel = CancellationToken::new();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            watch_silence(&ring, Duration::from_millis(50), cancel),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn watch_silence_stops_early_on_cancel() {
        let ring = RingBuffer::new(1024, 8_000);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { watch_silence(&ring, Duration::from_secs(60), cancel2).await });
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok());
    }
}
