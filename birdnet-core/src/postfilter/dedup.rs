//! Deduplication window (SPEC_FULL §4.5 step 5): suppress repeat
//! `(source, species)` predictions inside `min_detection_interval`.
//!
//! Per the recorded open-question decision (`DESIGN.md`), only predictions
//! that actually survive to become a `Detection` anchor the window —
//! suppressed hits never extend it.

use std::time::{Duration, SystemTime};

use dashmap::DashMap;

pub struct DedupWindow {
    last_seen: DashMap<(String, String), SystemTime>,
    interval: Duration,
}

impl DedupWindow {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_seen: DashMap::new(),
            interval,
        }
    }

    /// Returns `true` if this (source, species) pair should be suppressed —
    /// i.e. a prior *accepted* detection for the same pair happened less
    /// than `interval` ago. On acceptance (`false`), call [`Self::record`]
    /// to anchor the window.
    pub fn is_duplicate(&self, source_id: &str, species: &str, now: SystemTime) -> bool {
        match self.last_seen.get(&(source_id.to_string(), species.to_string())) {
            Some(last) => now.duration_since(*last).unwrap_or(Duration::ZERO) < self.interval,
            None => false,
        }
    }

    pub fn record(&self, source_id: &str, species: &str, now: SystemTime) {
        self.last_seen
            .insert((source_id.to_string(), species.to_string()), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_within_interval_is_suppressed() {
        let dedup = DedupWindow::new(Duration::from_secs(10));
        let t0 = SystemTime::now();
        assert!(!dedup.is_duplicate("mic0", "Y", t0));
        dedup.record("mic0", "Y", t0);

        let t1 = t0 + Duration::from_secs(5);
        assert!(dedup.is_duplicate("mic0", "Y", t1));
    }

    #[test]
    fn repeat_after_interval_is_allowed() {
        let dedup = DedupWindow::new(Duration::from_secs(10));
        let t0 = SystemTime::now();
        dedup.record("mic0", "Y", t0);

        let t1 = t0 + Duration::from_secs(11);
        assert!(!dedup.is_duplicate("mic0", "Y", t1));
    }

    #[test]
    fn different_sources_do_not_share_a_window() {
        let dedup = DedupWindow::new(Duration::from_secs(10));
        let t0 = SystemTime::now();
        dedup.record("mic0", "Y", t0);
        assert!(!dedup.is_duplicate("mic1", "Y", t0));
    }
}
