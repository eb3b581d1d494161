//! Range filter (SPEC_FULL §4.5 step 3).
//!
//! No species-occurrence range model ships in this crate — training and
//! shipping that lookup table is out of scope (SPEC_FULL §1 Non-goals name
//! the classifier model itself as externally supplied; the range model is
//! the same kind of externally supplied asset). `RangeModel` is the seam:
//! [`AlwaysPresent`] is the default implementation so the post-filter
//! pipeline runs end to end without one, and a real lookup (e.g. backed by
//! a range-model data file) can be swapped in without touching the
//! post-filter's call site.

use crate::config::PostFilterSettings;

/// Species-presence probability lookup at a (lat, lon, day-of-year).
pub trait RangeModel: Send + Sync {
    /// Probability in `[0, 1]` that `species` occurs at `(lat, lon)` on
    /// `day_of_year` (1-366).
    fn presence(&self, species: &str, lat: f64, lon: f64, day_of_year: u32) -> f32;
}

/// No-op range model: every species is always present. Used when no range
/// data asset is configured.
pub struct AlwaysPresent;

impl RangeModel for AlwaysPresent {
    fn presence(&self, _species: &str, _lat: f64, _lon: f64, _day_of_year: u32) -> f32 {
        1.0
    }
}

pub struct RangeFilter {
    model: Box<dyn RangeModel>,
    threshold: f32,
    lat: f64,
    lon: f64,
}

impl RangeFilter {
    pub fn new(model: Box<dyn RangeModel>, settings: &PostFilterSettings) -> Self {
        Self {
            model,
            threshold: settings.range_filter_threshold,
            lat: settings.latitude,
            lon: settings.longitude,
        }
    }

    /// `true` if `species` should be discarded at this time of year and
    /// location.
    pub fn should_discard(&self, species: &str, day_of_year: u32) -> bool {
        self.model.presence(species, self.lat, self.lon, day_of_year) < self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPresence(f32);
    impl RangeModel for FixedPresence {
        fn presence(&self, _species: &str, _lat: f64, _lon: f64, _day_of_year: u32) -> f32 {
            self.0
        }
    }

    #[test]
    fn always_present_never_discards() {
        let filter = RangeFilter::new(Box::new(AlwaysPresent), &PostFilterSettings::default());
        assert!(!filter.should_discard("Turdus migratorius", 180));
    }

    #[test]
    fn below_threshold_presence_is_discarded() {
        let settings = PostFilterSettings {
            range_filter_threshold: 0.1,
            ..PostFilterSettings::default()
        };
        let filter = RangeFilter::new(Box::new(FixedPresence(0.05)), &settings);
        assert!(filter.should_discard("Turdus migratorius", 180));
    }
}
