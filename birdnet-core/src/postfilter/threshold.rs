//! Per-species dynamic threshold state machine (SPEC_FULL §4.5 step 4).
//!
//! A species that just produced a high-confidence hit is "hot": its
//! effective gate drops for `validity` so a burst of the same bird calling
//! repeatedly doesn't get filtered out again at the base threshold. Sharded
//! by species name via `dashmap`, the same way the teacher shards
//! per-session state in `dictum-core/src/engine/session.rs`.

use std::time::{Duration, SystemTime};

use dashmap::DashMap;

use crate::config::PostFilterSettings;
use crate::model::ThresholdChangeReason;

const MAX_LEVEL: u8 = 3;

/// `effective = max(min_threshold, base × multiplier(level))` (SPEC_FULL
/// §3): level 0..3 maps to {1.00, 0.75, 0.50, 0.25}× the base threshold.
const LEVEL_MULTIPLIERS: [f32; 4] = [1.00, 0.75, 0.50, 0.25];

#[derive(Debug, Clone, Copy)]
struct ThresholdEntry {
    level: u8,
    expires_at: SystemTime,
    trigger_count: u32,
}

/// Result of feeding one prediction through the threshold state machine.
pub struct ThresholdUpdate {
    pub previous_level: u8,
    pub new_level: u8,
    pub reason: ThresholdChangeReason,
}

pub struct DynamicThreshold {
    entries: DashMap<String, ThresholdEntry>,
    base_threshold: f32,
    high_confidence: f32,
    min_threshold: f32,
    validity: Duration,
}

impl DynamicThreshold {
    pub fn new(settings: &PostFilterSettings) -> Self {
        Self {
            entries: DashMap::new(),
            base_threshold: settings.base_threshold,
            high_confidence: settings.high_confidence,
            min_threshold: settings.min_threshold,
            validity: settings.validity,
        }
    }

    fn effective_for_level(&self, level: u8) -> f32 {
        let multiplier = LEVEL_MULTIPLIERS[level.min(MAX_LEVEL) as usize];
        (self.base_threshold * multiplier).max(self.min_threshold)
    }

    /// Current effective gate for `species`, lazily initializing a level-0
    /// entry if this is the first time it's been seen.
    pub fn effective_threshold(&self, species: &str) -> f32 {
        let level = self
            .entries
            .get(species)
            .map(|e| e.level)
            .unwrap_or(0);
        self.effective_for_level(level)
    }

    /// Feeds one surviving prediction's confidence through the state
    /// machine. Returns `Some(update)` only when a high-confidence hit
    /// actually raised the level (the caller turns that into a
    /// `ThresholdChanged` SystemEvent); a confidence that doesn't clear
    /// `high_confidence`, or a species already at `MAX_LEVEL`, returns
    /// `None` without mutating anything further.
    pub fn observe(&self, species: &str, confidence: f32, now: SystemTime) -> Option<ThresholdUpdate> {
        if confidence < self.high_confidence {
            return None;
        }
        let mut entry = self
            .entries
            .entry(species.to_string())
            .or_insert(ThresholdEntry {
                level: 0,
                expires_at: now,
                trigger_count: 0,
            });

        let previous_level = entry.level;
        entry.trigger_count += 1;
        entry.expires_at = now + self.validity;
        if entry.level >= MAX_LEVEL {
            return None;
        }
        entry.level += 1;
        Some(ThresholdUpdate {
            previous_level,
            new_level: entry.level,
            reason: ThresholdChangeReason::HighConfidence,
        })
    }

    /// Background sweep (SPEC_FULL §4.5 "Threshold expiry"): every entry
    /// past its `expires_at` resets to level 0. Entries already at level 0
    /// are skipped — there is nothing to expire and no event to emit.
    pub fn sweep(&self, now: SystemTime) -> Vec<ThresholdUpdate> {
        let mut updates = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.level > 0 && now > entry.expires_at {
                let previous_level = entry.level;
                entry.level = 0;
                updates.push((entry.key().clone(), previous_level));
            }
        }
        updates
            .into_iter()
            .map(|(_species, previous_level)| ThresholdUpdate {
                previous_level,
                new_level: 0,
                reason: ThresholdChangeReason::Expiry,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PostFilterSettings {
        PostFilterSettings {
            base_threshold: 0.8,
            high_confidence: 0.9,
            min_threshold: 0.1,
            validity: Duration::from_secs(60),
            ..PostFilterSettings::default()
        }
    }

    #[test]
    fn four_consecutive_high_confidence_hits_cap_at_level_three() {
        let dt = DynamicThreshold::new(&settings());
        let now = SystemTime::now();

        assert_eq!(dt.effective_threshold("Y"), 0.8);

        dt.observe("Y", 0.95, now);
        assert!((dt.effective_threshold("Y") - 0.6).abs() < 1e-6);

        dt.observe("Y", 0.95, now);
        assert!((dt.effective_threshold("Y") - 0.4).abs() < 1e-6);

        dt.observe("Y", 0.95, now);
        assert!((dt.effective_threshold("Y") - 0.2).abs() < 1e-6);

        let update = dt.observe("Y", 0.95, now);
        assert!(update.is_none());
        assert!((dt.effective_threshold("Y") - 0.2).abs() < 1e-6);
    }

    #[test]
    fn sweep_resets_expired_entries_to_level_zero() {
        let dt = DynamicThreshold::new(&settings());
        let now = SystemTime::now();
        dt.observe("Y", 0.95, now);
        assert!((dt.effective_threshold("Y") - 0.6).abs() < 1e-6);

        let later = now + Duration::from_secs(120);
        let updates = dt.sweep(later);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].reason, ThresholdChangeReason::Expiry);
        assert_eq!(dt.effective_threshold("Y"), 0.8);
    }

    #[test]
    fn low_confidence_does_not_raise_level() {
        let dt = DynamicThreshold::new(&settings());
        let update = dt.observe("Y", 0.3, SystemTime::now());
        assert!(update.is_none());
        assert_eq!(dt.effective_threshold("Y"), 0.8);
    }
}
