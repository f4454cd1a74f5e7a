use chrono::{DateTime, Utc};

const SECONDS_PER_DAY: f64 = 24.0 * 60.0 * 60.0;

/// Default acceleration: one simulated year every half hour of wall time.
pub const DEFAULT_TIME_ACCELERATION: f64 = (365.0 * 24.0 * 3600.0) / (0.5 * 3600.0);

/// Maps wall-clock time onto simulated days.
///
/// `sim_day = start_day + elapsed_real_seconds * acceleration / 86400`
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    anchor: DateTime<Utc>,
    start_day: f64,
    acceleration: f64,
}

impl SimClock {
    pub fn new(anchor: DateTime<Utc>, start_day: f64, acceleration: f64) -> Self {
        Self {
            anchor,
            start_day,
            acceleration,
        }
    }

    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    /// Simulated day at wall time `now`. Never earlier than `start_day`.
    pub fn sim_day_at(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = seconds_between(self.anchor, now);
        self.start_day + elapsed * self.acceleration / SECONDS_PER_DAY
    }

    /// Simulated years elapsed since `start_day` for a given sim day.
    pub fn elapsed_years(&self, sim_day: f64) -> f64 {
        ((sim_day - self.start_day) / 365.0).max(0.0)
    }
}

/// Non-negative seconds from `from` to `to`, with millisecond resolution.
pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / 1000.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_sim_day_advances_with_acceleration() {
        let anchor = Utc::now();
        // 24x: one real hour is one simulated day
        let clock = SimClock::new(anchor, 90.0, 24.0);

        assert_eq!(clock.sim_day_at(anchor), 90.0);
        let day = clock.sim_day_at(anchor + Duration::hours(1));
        assert!((day - 91.0).abs() < 1e-9);
    }

    #[test]
    fn test_sim_day_never_before_start() {
        let anchor = Utc::now();
        let clock = SimClock::new(anchor, 10.0, DEFAULT_TIME_ACCELERATION);
        assert_eq!(clock.sim_day_at(anchor - Duration::minutes(5)), 10.0);
    }

    #[test]
    fn test_default_acceleration_is_a_year_per_half_hour() {
        let anchor = Utc::now();
        let clock = SimClock::new(anchor, 0.0, DEFAULT_TIME_ACCELERATION);
        let day = clock.sim_day_at(anchor + Duration::minutes(30));
        assert!((day - 365.0).abs() < 1e-6);
        assert!((clock.elapsed_years(day) - 1.0).abs() < 1e-6);
    }
}
