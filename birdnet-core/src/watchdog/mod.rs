//! Resource watchdog (SPEC_FULL §4.9): periodically samples disk, memory,
//! and CPU, publishes `SystemEvent::Resource` transitions onto the bus, and
//! signals dependent components directly when disk pressure turns critical
//! (persistence goes read-only, clip capture is suppressed).
//!
//! Grounded on the teacher's `PipelineDiagnostics` (plain atomic counters,
//! a `snapshot()` taken for reporting) for the counter shape, and on
//! `ferrex-player`'s `sysinfo::System` usage (`RefreshKind`, targeted
//! refreshes rather than `System::new_all()`) for the sampling calls.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Disks, MemoryRefreshKind, RefreshKind, System};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::config::WatchdogSettings;
use crate::model::{BusEvent, ResourceLevel, SystemEvent};
use crate::sinks::persistence::PersistenceSink;
use crate::sinks::prometheus::metric_names;

/// Hysteresis margin below `warning` a resource must drop before a
/// `Critical`/`Warning` level resolves back to `Ok` (SPEC_FULL §4.9),
/// preventing rapid level flapping around the threshold.
const HYSTERESIS_RATIO: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    Disk,
    Memory,
    Cpu,
}

impl Resource {
    fn name(self) -> &'static str {
        match self {
            Resource::Disk => "disk",
            Resource::Memory => "memory",
            Resource::Cpu => "cpu",
        }
    }
}

/// Last-published level per resource, used to suppress duplicate events and
/// to apply the hysteresis band.
struct ResourceState {
    level: ResourceLevel,
}

impl Default for ResourceState {
    fn default() -> Self {
        Self {
            level: ResourceLevel::Ok,
        }
    }
}

/// Diagnostics counters surfaced on the Prometheus scrape endpoint.
#[derive(Default)]
pub struct WatchdogDiagnostics {
    pub samples_taken: AtomicU64,
    pub disk_critical_events: AtomicU64,
}

pub struct Watchdog {
    settings: WatchdogSettings,
    bus: EventBus,
    persistence: Option<Arc<PersistenceSink>>,
    clip_suppressed: Arc<std::sync::atomic::AtomicBool>,
    pub diagnostics: Arc<WatchdogDiagnostics>,
}

impl Watchdog {
    pub fn new(settings: WatchdogSettings, bus: EventBus, persistence: Option<Arc<PersistenceSink>>) -> Self {
        Self {
            settings,
            bus,
            persistence,
            clip_suppressed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            diagnostics: Arc::new(WatchdogDiagnostics::default()),
        }
    }

    /// Whether clip capture should currently be skipped due to disk
    /// pressure (checked by the clip writer before every capture).
    pub fn clip_suppressed(&self) -> bool {
        self.clip_suppressed.load(Ordering::Relaxed)
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut sys = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
        );
        let mut disks = Disks::new_with_refreshed_list();
        let mut disk_state = ResourceState::default();
        let mut memory_state = ResourceState::default();
        let mut cpu_state = ResourceState::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.sample_interval) => {}
            }

            self.diagnostics.samples_taken.fetch_add(1, Ordering::Relaxed);

            disks.refresh(true);
            if let Some(ratio) = disk_usage_ratio(&disks, &self.settings.disk_path) {
                metrics::gauge!(
                    metric_names::DISK_USAGE_RATIO,
                    "path" => self.settings.disk_path.display().to_string(),
                )
                .set(ratio);
                self.evaluate(
                    Resource::Disk,
                    ratio,
                    self.settings.disk_warning_ratio,
                    self.settings.disk_critical_ratio,
                    &mut disk_state,
                )
                .await;
            }

            sys.refresh_memory();
            let total = sys.total_memory();
            if total > 0 {
                let ratio = sys.used_memory() as f64 / total as f64;
                metrics::gauge!(metric_names::MEMORY_USAGE_RATIO).set(ratio);
                self.evaluate(
                    Resource::Memory,
                    ratio,
                    self.settings.memory_warning_ratio,
                    self.settings.memory_critical_ratio,
                    &mut memory_state,
                )
                .await;
            }

            sys.refresh_cpu_usage();
            let cpu_ratio = sys.global_cpu_usage() as f64 / 100.0;
            metrics::gauge!(metric_names::CPU_USAGE_RATIO).set(cpu_ratio);
            self.evaluate(
                Resource::Cpu,
                cpu_ratio,
                self.settings.cpu_warning_ratio,
                self.settings.cpu_critical_ratio,
                &mut cpu_state,
            )
            .await;
        }
        info!("watchdog stopped");
    }

    async fn evaluate(
        &self,
        resource: Resource,
        value: f64,
        warning: f64,
        critical: f64,
        state: &mut ResourceState,
    ) {
        let resolve_floor = (warning - HYSTERESIS_RATIO).max(0.0);
        let new_level = if value >= critical {
            ResourceLevel::Critical
        } else if value >= warning {
            ResourceLevel::Warning
        } else if value < resolve_floor {
            ResourceLevel::Ok
        } else {
            // Inside the hysteresis band: hold the previous level.
            state.level
        };

        if new_level == state.level {
            return;
        }

        warn!(
            resource = resource.name(),
            value,
            ?new_level,
            "resource level changed"
        );

        if resource == Resource::Disk {
            match (state.level, new_level) {
                (_, ResourceLevel::Critical) => {
                    self.diagnostics.disk_critical_events.fetch_add(1, Ordering::Relaxed);
                    self.clip_suppressed.store(true, Ordering::Relaxed);
                    if let Some(persistence) = &self.persistence {
                        persistence.set_read_only(true);
                    }
                }
                (ResourceLevel::Critical, _) => {
                    self.clip_suppressed.store(false, Ordering::Relaxed);
                    if let Some(persistence) = &self.persistence {
                        persistence.set_read_only(false);
                    }
                }
                _ => {}
            }
        }

        state.level = new_level;
        let event = BusEvent::System(Box::new(SystemEvent::Resource {
            resource: resource.name().into(),
            level: new_level,
            value,
            threshold: if new_level == ResourceLevel::Critical { critical } else { warning },
            timestamp: chrono::Utc::now(),
        }));
        self.bus.publish(event).await;
    }
}

fn disk_usage_ratio(disks: &Disks, path: &std::path::Path) -> Option<f64> {
    let target = std::fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path));
    let mut best: Option<(usize, f64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if target.starts_with(mount) {
            let total = disk.total_space();
            if total == 0 {
                continue;
            }
            let used = total.saturating_sub(disk.available_space());
            let ratio = used as f64 / total as f64;
            let depth = mount.components().count();
            if best.map(|(d, _)| depth > d).unwrap_or(true) {
                best = Some((depth, ratio));
            }
        }
    }
    best.map(|(_, ratio)| ratio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn critical_disk_level_suppresses_clips_and_flips_persistence() {
        let bus = EventBus::new();
        let watchdog = Watchdog::new(WatchdogSettings::default(), bus, None);
        let mut state = ResourceState::default();
        watchdog
            .evaluate(Resource::Disk, 0.99, 0.85, 0.95, &mut state)
            .await;
        assert!(watchdog.clip_suppressed());
        assert_eq!(state.level, ResourceLevel::Critical);
    }

    #[tokio::test]
    async fn level_holds_inside_hysteresis_band() {
        let bus = EventBus::new();
        let watchdog = Watchdog::new(WatchdogSettings::default(), bus, None);
        let mut state = ResourceState {
            level: ResourceLevel::Warning,
        };
        // Just under `warning` but above `warning - hysteresis`: should hold.
        watchdog.evaluate(Resource::Disk, 0.84, 0.85, 0.95, &mut state).await;
        assert_eq!(state.level, ResourceLevel::Warning);
    }

    #[tokio::test]
    async fn level_resolves_once_below_hysteresis_floor() {
        let bus = EventBus::new();
        let watchdog = Watchdog::new(WatchdogSettings::default(), bus, None);
        let mut state = ResourceState {
            level: ResourceLevel::Warning,
        };
        watchdog.evaluate(Resource::Disk, 0.80, 0.85, 0.95, &mut state).await;
        assert_eq!(state.level, ResourceLevel::Ok);
    }
}
