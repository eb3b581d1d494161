//! Detection post-processing pipeline (SPEC_FULL §4.5): the seven-step
//! filter chain run over every surviving `SpeciesScore` in a `Prediction`,
//! turning it into a `Detection` published on the `detection.new` topic.

pub mod dedup;
pub mod enrich;
pub mod privacy;
pub mod range;
pub mod threshold;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::EventBus;
use crate::config::PostFilterSettings;
use crate::model::{
    BusEvent, Detection, Prediction, SpeciesScore, ThresholdChangeReason, VerificationStatus,
};

use dedup::DedupWindow;
use enrich::WeatherCache;
use privacy::PrivacyFilter;
use range::{AlwaysPresent, RangeFilter, RangeModel};
use threshold::DynamicThreshold;

/// Request handed off to a clip-writer task once a detection is confirmed
/// (SPEC_FULL §4.6). The post-filter never touches a `RingBuffer` directly —
/// the supervisor's clip manager owns the per-source rings.
#[derive(Debug, Clone)]
pub struct ClipRequest {
    pub detection_id: uuid::Uuid,
    pub source_id: String,
    pub species_code: String,
    pub confidence: f32,
    pub detected_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct PostFilterDiagnostics {
    pub predictions_in: AtomicU64,
    pub min_confidence_rejected: AtomicU64,
    pub species_policy_rejected: AtomicU64,
    pub range_rejected: AtomicU64,
    pub threshold_rejected: AtomicU64,
    pub dedup_suppressed: AtomicU64,
    pub privacy_suppressed: AtomicU64,
    pub detections_emitted: AtomicU64,
}

pub struct PostFilter {
    settings: PostFilterSettings,
    threshold: DynamicThreshold,
    dedup: DedupWindow,
    privacy: PrivacyFilter,
    range: RangeFilter,
    weather: WeatherCache,
    bus: EventBus,
    pub diagnostics: Arc<PostFilterDiagnostics>,
}

impl PostFilter {
    pub fn new(settings: PostFilterSettings, bus: EventBus) -> Self {
        Self::with_range_model(settings, bus, Box::new(AlwaysPresent))
    }

    pub fn with_range_model(
        settings: PostFilterSettings,
        bus: EventBus,
        range_model: Box<dyn RangeModel>,
    ) -> Self {
        let threshold = DynamicThreshold::new(&settings);
        let dedup = DedupWindow::new(settings.min_detection_interval);
        let privacy = PrivacyFilter::new(settings.privacy_filter_enabled, settings.privacy_voice_threshold);
        let range = RangeFilter::new(range_model, &settings);
        Self {
            weather: WeatherCache::default(),
            threshold,
            dedup,
            privacy,
            range,
            bus,
            diagnostics: Arc::new(PostFilterDiagnostics::default()),
            settings,
        }
    }

    pub fn weather_cache(&self) -> &WeatherCache {
        &self.weather
    }

    fn passes_species_policy(&self, species: &str) -> bool {
        if self.settings.species_deny.iter().any(|s| s == species) {
            return false;
        }
        if !self.settings.species_allow.is_empty()
            && !self.settings.species_allow.iter().any(|s| s == species)
        {
            return false;
        }
        true
    }

    /// Runs the filter chain over one scored species candidate from a
    /// prediction. Returns the confirmed `Detection`, or `None` if the
    /// candidate was filtered out at any step.
    fn evaluate(&self, prediction: &Prediction, score: &SpeciesScore, now: SystemTime) -> Option<Detection> {
        self.diagnostics.predictions_in.fetch_add(1, Ordering::Relaxed);
        let species = score.scientific_name.as_str();
        let confidence = score.confidence;

        if confidence < self.settings.min_threshold {
            self.diagnostics.min_confidence_rejected.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        if !self.passes_species_policy(species) {
            self.diagnostics.species_policy_rejected.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let now_utc: DateTime<Utc> = now.into();
        if self.range.should_discard(species, now_utc.ordinal()) {
            self.diagnostics.range_rejected.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if let Some(update) = self.threshold.observe(species, confidence, now) {
            self.publish_threshold_event(species, &update);
        }
        let effective = self.threshold.effective_threshold(species);
        if confidence < effective {
            self.diagnostics.threshold_rejected.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if self.dedup.is_duplicate(&prediction.source_id, species, now) {
            self.diagnostics.dedup_suppressed.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if self.privacy.should_suppress(prediction.voice_presence) {
            self.diagnostics.privacy_suppressed.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.dedup.record(&prediction.source_id, species, now);

        let time_of_day = Some(enrich::time_of_day(now_utc, self.settings.latitude, self.settings.longitude));
        let weather = if self.settings.weather_enabled {
            self.weather.snapshot(
                now_utc,
                chrono::Duration::from_std(self.settings.weather_staleness).unwrap_or(chrono::Duration::hours(1)),
            )
        } else {
            None
        };

        self.diagnostics.detections_emitted.fetch_add(1, Ordering::Relaxed);

        Some(Detection {
            id: uuid::Uuid::new_v4(),
            source_id: prediction.source_id.clone(),
            begin: prediction.window_start.into(),
            end: prediction.window_end.into(),
            detected_at: now_utc,
            scientific_name: score.scientific_name.clone(),
            common_name: score.common_name.clone(),
            species_code: score.species_code.clone(),
            confidence,
            clip_path: None,
            weather,
            time_of_day,
            verification: VerificationStatus::Unverified,
            locked: false,
            comments: Vec::new(),
        })
    }

    fn publish_threshold_event(&self, species: &str, update: &threshold::ThresholdUpdate) {
        let event = BusEvent::System(Box::new(crate::model::SystemEvent::ThresholdChanged {
            species: species.to_string(),
            previous_level: update.previous_level,
            new_level: update.new_level,
            reason: update.reason,
            new_value: self.threshold.effective_threshold(species),
            timestamp: Utc::now(),
        }));
        let bus = self.bus.clone();
        tokio::spawn(async move {
            bus.publish(event).await;
        });
    }

    /// Consumes predictions until `cancel` fires, publishing confirmed
    /// detections and (if `clip_tx` is set) handing off clip-capture
    /// requests.
    pub async fn run(
        self: Arc<Self>,
        mut predictions: mpsc::Receiver<Prediction>,
        clip_tx: Option<mpsc::Sender<ClipRequest>>,
        cancel: CancellationToken,
    ) {
        loop {
            let prediction = tokio::select! {
                _ = cancel.cancelled() => break,
                p = predictions.recv() => match p {
                    Some(p) => p,
                    None => break,
                },
            };

            let now = SystemTime::now();
            for score in prediction.scores.clone() {
                if let Some(detection) = self.evaluate(&prediction, &score, now) {
                    debug!(species = %detection.scientific_name, confidence = detection.confidence, "detection confirmed");
                    if let Some(tx) = &clip_tx {
                        let _ = tx
                            .try_send(ClipRequest {
                                detection_id: detection.id,
                                source_id: detection.source_id.clone(),
                                species_code: detection.species_code.clone(),
                                confidence: detection.confidence,
                                detected_at: detection.detected_at,
                            });
                    }
                    self.bus.publish(BusEvent::Detection(Box::new(detection))).await;
                }
            }
        }
        info!("postfilter stopped");
    }

    /// Background sweeper (SPEC_FULL §4.5 "Threshold expiry").
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.sweep_interval) => {}
            }
            let now = SystemTime::now();
            for update in self.threshold.sweep(now) {
                debug!(reason = ?update.reason, "threshold entry expired");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::TopicFilter;

    fn prediction(source: &str, species: &str, confidence: f32) -> Prediction {
        let now = SystemTime::now();
        Prediction {
            source_id: source.into(),
            frame_seq: 1,
            window_start: now,
            window_end: now,
            scores: vec![SpeciesScore {
                scientific_name: species.into(),
                common_name: species.into(),
                species_code: "test".into(),
                confidence,
            }],
            voice_presence: None,
        }
    }

    #[tokio::test]
    async fn high_confidence_prediction_produces_a_detection() {
        let bus = EventBus::new();
        let (_id, rx) = bus.subscribe("test", TopicFilter::Exact("detection.new".into()), 8, crate::bus::OverflowPolicy::DropOldest);
        let filter = Arc::new(PostFilter::new(PostFilterSettings::default(), bus));

        let (tx, rx_pred) = mpsc::channel(4);
        tx.send(prediction("mic0", "Turdus migratorius", 0.95)).await.unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        filter.clone().run(rx_pred, None, cancel).await;

        let event = rx.recv().await.expect("detection published");
        assert_eq!(event.topic(), "detection.new");
        assert_eq!(filter.diagnostics.detections_emitted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn below_base_threshold_is_rejected() {
        let bus = EventBus::new();
        let filter = Arc::new(PostFilter::new(PostFilterSettings::default(), bus));
        let (tx, rx_pred) = mpsc::channel(4);
        tx.send(prediction("mic0", "Turdus migratorius", 0.2)).await.unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        filter.clone().run(rx_pred, None, cancel).await;
        assert_eq!(filter.diagnostics.detections_emitted.load(Ordering::Relaxed), 0);
        assert_eq!(filter.diagnostics.threshold_rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn dedup_suppresses_repeat_within_window() {
        let bus = EventBus::new();
        let filter = Arc::new(PostFilter::new(PostFilterSettings::default(), bus));
        let (tx, rx_pred) = mpsc::channel(4);
        tx.send(prediction("mic0", "Turdus migratorius", 0.95)).await.unwrap();
        tx.send(prediction("mic0", "Turdus migratorius", 0.95)).await.unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        filter.clone().run(rx_pred, None, cancel).await;
        assert_eq!(filter.diagnostics.detections_emitted.load(Ordering::Relaxed), 1);
        assert_eq!(filter.diagnostics.dedup_suppressed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn species_deny_list_rejects_matching_species() {
        let bus = EventBus::new();
        let settings = PostFilterSettings {
            species_deny: vec!["Turdus migratorius".into()],
            ..PostFilterSettings::default()
        };
        let filter = Arc::new(PostFilter::new(settings, bus));
        let (tx, rx_pred) = mpsc::channel(4);
        tx.send(prediction("mic0", "Turdus migratorius", 0.95)).await.unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        filter.clone().run(rx_pred, None, cancel).await;
        assert_eq!(filter.diagnostics.species_policy_rejected.load(Ordering::Relaxed), 1);
    }
}
