//! `Settings` — the validated configuration snapshot every component takes
//! as an explicit constructor parameter (SPEC_FULL §9: "global singletons →
//! explicit context").
//!
//! Full YAML loading and CLI parsing are out of scope (SPEC_FULL §1); this
//! module only builds a concrete, typed `Settings` value with the defaults
//! named throughout §4 and §6, plus a minimal `from_env()` constructor so
//! the crate is runnable without a general config framework.

use std::path::PathBuf;
use std::time::Duration;

/// One configured audio source.
#[derive(Debug, Clone)]
pub enum SourceSettings {
    Local {
        id: String,
        device: Option<String>,
    },
    Rtsp {
        id: String,
        url: String,
        transport: RtspTransport,
    },
}

impl SourceSettings {
    pub fn id(&self) -> &str {
        match self {
            SourceSettings::Local { id, .. } => id,
            SourceSettings::Rtsp { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtspTransport {
    Tcp,
    Udp,
}

#[derive(Debug, Clone)]
pub struct RingSettings {
    /// Safety factor multiplied into the minimum required capacity
    /// (SPEC_FULL §4.1): `capacity = max(window, clip) * rate * 2 * factor`.
    pub safety_factor: u32,
    /// How long a source may go without a write heartbeat before the
    /// watchdog signals a restart.
    pub source_silence_timeout: Duration,
}

impl Default for RingSettings {
    fn default() -> Self {
        Self {
            safety_factor: 3,
            source_silence_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WindowSettings {
    pub sample_rate: u32,
    pub window_duration: Duration,
    pub overlap: Duration,
    /// Bounded per-source channel capacity between windower and inferencer.
    pub frame_queue_capacity: usize,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            window_duration: Duration::from_secs(3),
            overlap: Duration::ZERO,
            frame_queue_capacity: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub worker_threads: usize,
    pub model_path: Option<PathBuf>,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            model_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostFilterSettings {
    pub base_threshold: f32,
    pub high_confidence: f32,
    pub min_threshold: f32,
    pub validity: Duration,
    pub sweep_interval: Duration,
    pub min_detection_interval: Duration,
    pub range_filter_threshold: f32,
    pub privacy_filter_enabled: bool,
    pub privacy_voice_threshold: f32,
    pub weather_staleness: Duration,
    pub weather_enabled: bool,
    pub latitude: f64,
    pub longitude: f64,
    /// `SpeciesPolicy`: if non-empty, only these scientific names may pass
    /// step 2 of the post-filter. Empty means "no allow restriction".
    pub species_allow: Vec<String>,
    /// `SpeciesPolicy`: scientific names that never pass step 2, regardless
    /// of the allow list.
    pub species_deny: Vec<String>,
}

impl Default for PostFilterSettings {
    fn default() -> Self {
        Self {
            base_threshold: 0.7,
            high_confidence: 0.9,
            min_threshold: 0.1,
            validity: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(60),
            min_detection_interval: Duration::from_secs(10),
            range_filter_threshold: 0.01,
            privacy_filter_enabled: false,
            privacy_voice_threshold: 0.5,
            weather_staleness: Duration::from_secs(3600),
            weather_enabled: false,
            latitude: 0.0,
            longitude: 0.0,
            species_allow: Vec::new(),
            species_deny: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClipSettings {
    pub enabled: bool,
    pub base_path: PathBuf,
    pub pre_roll: Duration,
    pub post_roll: Duration,
    pub codec: crate::clip::codec::ClipCodec,
    /// `None` = capture all retained detections; `Some(set)` restricts to
    /// listed species codes.
    pub species_allowlist: Option<Vec<String>>,
    pub queue_capacity: usize,
}

impl Default for ClipSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_path: PathBuf::from("clips"),
            pre_roll: Duration::from_millis(1500),
            post_roll: Duration::from_millis(1500),
            codec: crate::clip::codec::ClipCodec::Wav,
            species_allowlist: None,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub sqlite_path: PathBuf,
    pub mqtt: Option<MqttSettings>,
    pub birdweather: Option<HttpSinkSettings>,
    pub shoutrrr: Option<HttpSinkSettings>,
    pub sse_enabled: bool,
    pub sse_queue_capacity: usize,
    pub prometheus_enabled: bool,
    pub prometheus_listen: String,
    pub publish_timeout: Duration,
    pub sink_queue_capacity: usize,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("birdnet.db"),
            mqtt: None,
            birdweather: None,
            shoutrrr: None,
            sse_enabled: true,
            sse_queue_capacity: 64,
            prometheus_enabled: false,
            prometheus_listen: "0.0.0.0:9090".into(),
            publish_timeout: Duration::from_millis(50),
            sink_queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub topic_prefix: String,
}

#[derive(Debug, Clone)]
pub struct HttpSinkSettings {
    pub endpoint: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub sample_interval: Duration,
    pub disk_path: PathBuf,
    pub disk_warning_ratio: f64,
    pub disk_critical_ratio: f64,
    pub memory_warning_ratio: f64,
    pub memory_critical_ratio: f64,
    pub cpu_warning_ratio: f64,
    pub cpu_critical_ratio: f64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(10),
            disk_path: PathBuf::from("."),
            disk_warning_ratio: 0.85,
            disk_critical_ratio: 0.95,
            memory_warning_ratio: 0.85,
            memory_critical_ratio: 0.95,
            cpu_warning_ratio: 0.90,
            cpu_critical_ratio: 0.98,
        }
    }
}

/// Shutdown deadlines per stage (SPEC_FULL §4.10).
#[derive(Debug, Clone)]
pub struct ShutdownSettings {
    pub source: Duration,
    pub inferencer: Duration,
    pub bus: Duration,
    pub persistence: Duration,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            source: Duration::from_secs(2),
            inferencer: Duration::from_secs(10),
            bus: Duration::from_secs(5),
            persistence: Duration::from_secs(30),
        }
    }
}

/// The full, validated configuration snapshot. Immutable after
/// construction (SPEC_FULL §5); every component takes a clone or borrow of
/// the sub-struct it needs, never a global.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub sources: Vec<SourceSettings>,
    pub ring: RingSettings,
    pub window: WindowSettings,
    pub inference: InferenceSettings,
    pub postfilter: PostFilterSettings,
    pub clip: ClipSettings,
    pub sinks: SinkSettings,
    pub watchdog: WatchdogSettings,
    pub shutdown: ShutdownSettings,
    pub startup_fail_delay: Duration,
}

impl Settings {
    /// Build a `Settings` value from the environment variables and options
    /// named in SPEC_FULL §6, falling back to defaults for everything else.
    /// This stands in for the externally owned YAML config loader / CLI
    /// parser (§1 Non-goals) — it is deliberately not a general config
    /// system.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();

        if let Ok(dev) = std::env::var("BIRDNET_SOURCE") {
            settings.sources.push(SourceSettings::Local {
                id: "local-0".into(),
                device: Some(dev),
            });
        }
        if let Ok(url) = std::env::var("BIRDNET_RTSP") {
            let transport = match std::env::var("BIRDNET_RTSP_TRANSPORT").as_deref() {
                Ok("udp") => RtspTransport::Udp,
                _ => RtspTransport::Tcp,
            };
            settings.sources.push(SourceSettings::Rtsp {
                id: "rtsp-0".into(),
                url,
                transport,
            });
        }

        if let Ok(path) = std::env::var("BIRDNET_CLIPPATH") {
            settings.clip.base_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("BIRDNET_MODELPATH") {
            settings.inference.model_path = Some(PathBuf::from(path));
        }
        if std::env::var("BIRDNET_TELEMETRY").is_ok() {
            settings.sinks.prometheus_enabled = true;
        }
        if let Ok(listen) = std::env::var("BIRDNET_LISTEN") {
            settings.sinks.prometheus_listen = listen;
        }
        if let Ok(secs) = std::env::var("BIRDNET_STARTUP_FAIL_DELAY") {
            if let Ok(secs) = secs.parse::<u64>() {
                settings.startup_fail_delay = Duration::from_secs(secs);
            }
        }

        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_postfilter_settings_match_spec_defaults() {
        let s = PostFilterSettings::default();
        assert_eq!(s.high_confidence, 0.9);
        assert_eq!(s.min_detection_interval, Duration::from_secs(10));
    }

    #[test]
    fn from_env_picks_up_rtsp_source() {
        std::env::set_var("BIRDNET_RTSP", "rtsp://example.invalid/stream");
        std::env::set_var("BIRDNET_RTSP_TRANSPORT", "udp");
        let settings = Settings::from_env();
        std::env::remove_var("BIRDNET_RTSP");
        std::env::remove_var("BIRDNET_RTSP_TRANSPORT");

        assert_eq!(settings.sources.len(), 1);
        match &settings.sources[0] {
            SourceSettings::Rtsp { transport, .. } => assert_eq!(*transport, RtspTransport::Udp),
            _ => panic!("expected rtsp source"),
        }
    }
}
