//! Prometheus scrape sink (SPEC_FULL §4.8 / §6): a pull-based
//! `/metrics` endpoint backed by `metrics-exporter-prometheus`. Counters and
//! gauges are recorded at their point of origin throughout the pipeline via
//! the `metrics` facade macros (`counter!`, `gauge!`, `histogram!`); this
//! module only owns the recorder/exporter handle and the axum route that
//! renders it.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{BirdnetError, Result};

pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| BirdnetError::Other(e.into()))
}

pub async fn metrics_handler(
    axum::extract::State(handle): axum::extract::State<PrometheusHandle>,
) -> String {
    handle.render()
}

/// Counter/gauge/histogram names surfaced on the scrape endpoint (SPEC_FULL
/// §6), kept in one place so every call site uses the same string.
pub mod metric_names {
    pub const RING_DROPPED_BYTES_TOTAL: &str = "birdnet_ring_dropped_bytes_total";
    pub const INFERENCE_LAG_DROPS_TOTAL: &str = "birdnet_inference_lag_drops_total";
    pub const INFERENCE_SECONDS: &str = "birdnet_inference_seconds";
    pub const INFERENCE_ERRORS_TOTAL: &str = "birdnet_inference_errors_total";
    pub const DETECTIONS_TOTAL: &str = "birdnet_detections_total";
    pub const PRIVACY_SUPPRESSED_TOTAL: &str = "birdnet_privacy_suppressed_total";
    pub const CLIP_SUPPRESSED_DISK_PRESSURE_TOTAL: &str = "birdnet_clip_suppressed_disk_pressure_total";
    pub const EVENTS_DROPPED_TOTAL: &str = "birdnet_events_dropped_total";
    pub const PUBLISH_TIMEOUT_TOTAL: &str = "birdnet_publish_timeout_total";
    pub const PERSISTENCE_ERRORS_TOTAL: &str = "birdnet_persistence_errors_total";
    pub const RESOURCE_LEVEL: &str = "birdnet_resource_level";
    pub const SOURCE_UP: &str = "birdnet_source_up";
    pub const DYNAMIC_THRESHOLD_LEVEL: &str = "birdnet_dynamic_threshold_level";
    pub const DISK_USAGE_RATIO: &str = "birdnet_disk_usage_ratio";
    pub const MEMORY_USAGE_RATIO: &str = "birdnet_memory_usage_ratio";
    pub const CPU_USAGE_RATIO: &str = "birdnet_cpu_usage_ratio";
}
