//! Privacy filter (SPEC_FULL §4.5 step 6).
//!
//! The voice-presence head lives in the classifier (`Prediction.voice_presence`,
//! see [`crate::inference`]); this module only applies the gate and, per the
//! recorded open-question decision, counts suppressions under
//! `privacy_suppressed` without otherwise touching per-species state.

pub struct PrivacyFilter {
    enabled: bool,
    voice_threshold: f32,
}

impl PrivacyFilter {
    pub fn new(enabled: bool, voice_threshold: f32) -> Self {
        Self {
            enabled,
            voice_threshold,
        }
    }

    /// `true` if this prediction's window should be suppressed as likely
    /// human speech.
    pub fn should_suppress(&self, voice_presence: Option<f32>) -> bool {
        if !self.enabled {
            return false;
        }
        voice_presence.is_some_and(|p| p >= self.voice_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_filter_never_suppresses() {
        let filter = PrivacyFilter::new(false, 0.5);
        assert!(!filter.should_suppress(Some(0.99)));
    }

    #[test]
    fn enabled_filter_suppresses_above_threshold() {
        let filter = PrivacyFilter::new(true, 0.5);
        assert!(filter.should_suppress(Some(0.6)));
        assert!(!filter.should_suppress(Some(0.4)));
    }

    #[test]
    fn missing_voice_head_never_suppresses() {
        let filter = PrivacyFilter::new(true, 0.5);
        assert!(!filter.should_suppress(None));
    }
}
