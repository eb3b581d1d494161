//! Shared data types that flow between pipeline stages.
//!
//! `AudioFrame` and `Prediction` are transient, stage-to-stage values.
//! `Detection` and `SystemEvent` are the two tagged event variants that
//! cross the `EventBus` boundary (see [`crate::bus`]); sinks pattern-match
//! on their tag rather than on any dynamic type.

use std::time::{Instant, SystemTime};

use serde::{Deserialize, Serialize};

/// Immutable view over one windowed slice of PCM audio.
///
/// Ownership passes from the ring reader to the windower to the inferencer;
/// the frame is dropped after inference. `seq` is a monotonically
/// increasing per-source counter used to enforce strict delivery order into
/// the inferencer.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub source_id: String,
    pub seq: u64,
    pub monotonic_start: Instant,
    pub wall_start: SystemTime,
    pub sample_rate: u32,
    pub channels: u16,
    /// Signed 16-bit little-endian mono samples, tightly packed.
    pub pcm: Vec<u8>,
}

impl AudioFrame {
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }

    pub fn duration_secs(&self) -> f64 {
        self.sample_count() as f64 / self.sample_rate as f64
    }

    /// Decode the owned S16LE bytes into `f32` samples in `[-1, 1]`, as the
    /// classifier worker expects (SPEC_FULL §4.4).
    pub fn to_f32_samples(&self) -> Vec<f32> {
        self.pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
            .collect()
    }
}

/// One scored candidate species from a classifier pass. Scientific name is
/// the identity used for dedup/threshold/range state (SPEC_FULL §4.5);
/// common name and species code come from the classifier's own label table
/// so the post-filter never has to re-derive them.
#[derive(Debug, Clone)]
pub struct SpeciesScore {
    pub scientific_name: String,
    pub common_name: String,
    pub species_code: String,
    pub confidence: f32,
}

/// Raw output of one inference pass over an `AudioFrame`.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub source_id: String,
    pub frame_seq: u64,
    pub window_start: SystemTime,
    pub window_end: SystemTime,
    pub scores: Vec<SpeciesScore>,
    /// Confidence the window contains human speech, if the backend exposes
    /// a voice-presence head (used by the privacy filter).
    pub voice_presence: Option<f32>,
}

/// Operator-visible verification status of a persisted detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Correct,
    FalsePositive,
}

/// A snapshot of recent weather conditions attached to a detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSnapshot {
    pub observed_at: chrono::DateTime<chrono::Utc>,
    pub temperature_c: f32,
    pub wind_speed_ms: f32,
    pub condition: String,
}

/// Coarse sun-phase classification attached at enrichment time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Night,
    Dawn,
    Day,
    Dusk,
}

/// A persisted, operator-visible detection (SPEC_FULL §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub id: uuid::Uuid,
    pub source_id: String,
    pub begin: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
    pub detected_at: chrono::DateTime<chrono::Utc>,
    pub scientific_name: String,
    pub common_name: String,
    pub species_code: String,
    pub confidence: f32,
    pub clip_path: Option<String>,
    pub weather: Option<WeatherSnapshot>,
    pub time_of_day: Option<TimeOfDay>,
    pub verification: VerificationStatus,
    pub locked: bool,
    pub comments: Vec<String>,
}

/// Severity level carried by a `SystemEvent::Resource` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceLevel {
    Ok,
    Warning,
    Critical,
}

/// Lifecycle notification kind carried by a `SystemEvent::Lifecycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleKind {
    Start,
    Stop,
    Pause,
    Resume,
    Error,
}

/// Tagged event variant replacing the source's dynamically typed event
/// objects (SPEC_FULL §9): `detection.new | system.resource | lifecycle |
/// threshold.changed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SystemEvent {
    Resource {
        resource: String,
        level: ResourceLevel,
        value: f64,
        threshold: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Lifecycle {
        kind: LifecycleKind,
        component: String,
        cause: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    ThresholdChanged {
        species: String,
        previous_level: u8,
        new_level: u8,
        reason: ThresholdChangeReason,
        new_value: f32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Why a `DynamicThreshold` entry changed level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdChangeReason {
    HighConfidence,
    Expiry,
}

/// A bus event, either a new detection or a system notification. Sinks
/// match on this instead of inspecting a dynamic payload type.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Detection(Box<Detection>),
    System(Box<SystemEvent>),
}

impl BusEvent {
    /// Bus topic this event is published under, used for subscriber
    /// topic-filter matching (SPEC_FULL §4.7).
    pub fn topic(&self) -> &'static str {
        match self {
            BusEvent::Detection(_) => "detection.new",
            BusEvent::System(e) => match **e {
                SystemEvent::Resource { .. } => "system.resource",
                SystemEvent::Lifecycle { .. } => "lifecycle",
                SystemEvent::ThresholdChanged { .. } => "threshold.changed",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_frame_decodes_s16le_to_normalized_f32() {
        let frame = AudioFrame {
            source_id: "mic0".into(),
            seq: 1,
            monotonic_start: Instant::now(),
            wall_start: SystemTime::now(),
            sample_rate: 48_000,
            channels: 1,
            pcm: i16::MAX.to_le_bytes().to_vec(),
        };
        let samples = frame.to_f32_samples();
        assert_eq!(samples.len(), 1);
        assert!((samples[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn detection_serializes_with_camel_case_and_snake_case_tags() {
        let detection = Detection {
            id: uuid::Uuid::nil(),
            source_id: "mic0".into(),
            begin: chrono::Utc::now(),
            end: chrono::Utc::now(),
            detected_at: chrono::Utc::now(),
            scientific_name: "Turdus migratorius".into(),
            common_name: "American Robin".into(),
            species_code: "amerob".into(),
            confidence: 0.85,
            clip_path: None,
            weather: None,
            time_of_day: None,
            verification: VerificationStatus::Unverified,
            locked: false,
            comments: vec![],
        };
        let json = serde_json::to_value(&detection).expect("serialize detection");
        assert_eq!(json["speciesCode"], "amerob");
        assert_eq!(json["verification"], "unverified");
    }

    #[test]
    fn bus_event_topic_matches_tag() {
        let event = BusEvent::System(Box::new(SystemEvent::Lifecycle {
            kind: LifecycleKind::Start,
            component: "watchdog".into(),
            cause: None,
            timestamp: chrono::Utc::now(),
        }));
        assert_eq!(event.topic(), "lifecycle");
    }
}
