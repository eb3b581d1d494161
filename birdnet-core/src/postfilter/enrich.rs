//! Time-of-day / weather enrichment (SPEC_FULL §4.5 step 7).
//!
//! Sun-phase is computed with the standard NOAA solar-position
//! approximation (declination + hour angle) rather than pulled from a
//! crate — nothing in the retrieved pack depends on an ephemeris library,
//! and the formula is a few dozen lines of arithmetic over `chrono` types
//! the crate already depends on. Weather is an externally fed cache:
//! nothing in this pipeline polls a weather API (out of scope, SPEC_FULL
//! §1 Non-goals), so [`WeatherCache`] only holds whatever the operator's
//! integration last pushed into it.

use chrono::{DateTime, Datelike, Timelike, Utc};
use parking_lot::Mutex;

use crate::model::{TimeOfDay, WeatherSnapshot};

const DAWN_DUSK_WINDOW_MINUTES: i64 = 30;

/// Sun-phase classification for `now` at `(lat, lon)` in decimal degrees.
pub fn time_of_day(now: DateTime<Utc>, lat: f64, lon: f64) -> TimeOfDay {
    let (sunrise, sunset) = solar_times(now, lat, lon);
    let dawn_end = sunrise + chrono::Duration::minutes(DAWN_DUSK_WINDOW_MINUTES);
    let dawn_start = sunrise - chrono::Duration::minutes(DAWN_DUSK_WINDOW_MINUTES);
    let dusk_start = sunset - chrono::Duration::minutes(DAWN_DUSK_WINDOW_MINUTES);
    let dusk_end = sunset + chrono::Duration::minutes(DAWN_DUSK_WINDOW_MINUTES);

    if now >= dawn_start && now < dawn_end {
        TimeOfDay::Dawn
    } else if now >= dusk_start && now < dusk_end {
        TimeOfDay::Dusk
    } else if now >= dawn_end && now < dusk_start {
        TimeOfDay::Day
    } else {
        TimeOfDay::Night
    }
}

/// Approximate sunrise/sunset for the UTC calendar day containing `now`, at
/// `(lat, lon)`. Accurate to within a few minutes for non-polar latitudes,
/// which is all this sun-phase tag needs.
fn solar_times(now: DateTime<Utc>, lat: f64, lon: f64) -> (DateTime<Utc>, DateTime<Utc>) {
    let day_of_year = now.ordinal() as f64;
    let lat_rad = lat.to_radians();

    // Solar declination (Cooper's approximation).
    let declination = 23.45_f64.to_radians() * ((360.0 / 365.0) * (284.0 + day_of_year)).to_radians().sin();

    // Hour angle at sunrise/sunset.
    let cos_hour_angle = (-lat_rad.tan() * declination.tan()).clamp(-1.0, 1.0);
    let hour_angle = cos_hour_angle.acos().to_degrees();

    // Solar noon in UTC hours, from longitude only (ignores the equation of
    // time, which is within a few minutes for this purpose).
    let solar_noon_utc = 12.0 - lon / 15.0;
    let daylight_half_hours = hour_angle / 15.0;

    let sunrise_hour = solar_noon_utc - daylight_half_hours;
    let sunset_hour = solar_noon_utc + daylight_half_hours;

    let base = now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
    (
        base + chrono::Duration::seconds((sunrise_hour * 3600.0).round() as i64),
        base + chrono::Duration::seconds((sunset_hour * 3600.0).round() as i64),
    )
}

/// Holds the most recently pushed weather observation. Reads return `None`
/// once the cached snapshot is older than `staleness`.
pub struct WeatherCache {
    latest: Mutex<Option<WeatherSnapshot>>,
}

impl Default for WeatherCache {
    fn default() -> Self {
        Self {
            latest: Mutex::new(None),
        }
    }
}

impl WeatherCache {
    pub fn update(&self, snapshot: WeatherSnapshot) {
        *self.latest.lock() = Some(snapshot);
    }

    pub fn snapshot(&self, now: DateTime<Utc>, staleness: chrono::Duration) -> Option<WeatherSnapshot> {
        let guard = self.latest.lock();
        guard.as_ref().and_then(|snap| {
            if now - snap.observed_at <= staleness {
                Some(snap.clone())
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn midday_utc_at_equator_is_day() {
        let now = Utc.with_ymd_and_hms(2026, 6, 21, 12, 0, 0).unwrap();
        assert_eq!(time_of_day(now, 0.0, 0.0), TimeOfDay::Day);
    }

    #[test]
    fn midnight_utc_at_equator_is_night() {
        let now = Utc.with_ymd_and_hms(2026, 6, 21, 0, 0, 0).unwrap();
        assert_eq!(time_of_day(now, 0.0, 0.0), TimeOfDay::Night);
    }

    #[test]
    fn weather_cache_expires_stale_snapshots() {
        let cache = WeatherCache::default();
        let observed_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        cache.update(WeatherSnapshot {
            observed_at,
            temperature_c: 10.0,
            wind_speed_ms: 2.0,
            condition: "clear".into(),
        });

        let fresh_check = observed_at + chrono::Duration::minutes(10);
        assert!(cache.snapshot(fresh_check, chrono::Duration::hours(1)).is_some());

        let stale_check = observed_at + chrono::Duration::hours(2);
        assert!(cache.snapshot(stale_check, chrono::Duration::hours(1)).is_none());
    }
}
