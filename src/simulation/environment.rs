//! # Environment Model
//!
//! Heuristic greenhouse climate driven by simulated time:
//!
//! - **Temperature**: latitude-scaled base, seasonal and daily sinusoids, slowly widening noise
//! - **Humidity**: falls with temperature, follows a daily cycle, coupled to soil moisture
//! - **Moisture**: loses water to evaporation over real elapsed time, gains from the pump
//!
//! Actuators never set a variable directly. Each on/off command sets a target bias and the
//! model's tilt accumulator follows that target with a first-order low-pass filter, so the
//! environment drifts toward the actuator's effect instead of jumping to it.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::clock::{seconds_between, SimClock, DEFAULT_TIME_ACCELERATION};
use crate::domain::SensorType;
use crate::state::Commands;

const HEATER_DELTA_C: f64 = 3.0;
const FAN_DELTA_C: f64 = -3.0;
const HUMIDIFIER_DELTA_PCT: f64 = 10.0;
const DEHUMIDIFIER_DELTA_PCT: f64 = -10.0;
const PUMP_DELTA: f64 = 50.0;

const HUMIDITY_NOISE_STD: f64 = 3.0;
const MAX_EVAPORATION_MM_DAY: f64 = 12.0;
const SECONDS_PER_DAY: f64 = 24.0 * 60.0 * 60.0;

/// Smoothing factor per variable: the fraction of the remaining distance to the target
/// the tilt covers in one tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TiltSmoothing {
    pub temperature: f64,
    pub humidity: f64,
    pub moisture: f64,
}

impl Default for TiltSmoothing {
    fn default() -> Self {
        Self {
            temperature: 0.05,
            humidity: 0.01,
            moisture: 0.01,
        }
    }
}

/// Starting values. Drawn at random when not configured.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InitialConditions {
    pub temperature: f64,
    pub humidity: f64,
    pub moisture: f64,
}

impl InitialConditions {
    pub fn is_finite(&self) -> bool {
        self.temperature.is_finite() && self.humidity.is_finite() && self.moisture.is_finite()
    }
}

/// Environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Latitude in degrees, drives seasonal and daily amplitude
    pub latitude: f64,
    /// Simulated day of year at startup
    pub start_day: f64,
    /// Simulated seconds per real second
    pub time_acceleration: f64,
    /// Environment tick period
    pub tick_millis: u64,
    pub smoothing: TiltSmoothing,
    pub initial: Option<InitialConditions>,
    /// Gaussian noise on temperature and humidity
    pub enable_noise: bool,
    /// Random seed for reproducibility (None = random)
    pub random_seed: Option<u64>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            latitude: 45.0,
            start_day: 90.0,
            time_acceleration: DEFAULT_TIME_ACCELERATION,
            tick_millis: 1000,
            smoothing: TiltSmoothing::default(),
            initial: None,
            enable_noise: true,
            random_seed: None,
        }
    }
}

impl EnvironmentConfig {
    pub fn with_latitude(mut self, latitude: f64) -> Self {
        self.latitude = latitude;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn with_initial(mut self, initial: InitialConditions) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn without_noise(mut self) -> Self {
        self.enable_noise = false;
        self
    }

    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_millis)
    }
}

/// Actuator influence accumulated per variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Tilt {
    pub temperature: f64,
    pub humidity: f64,
    pub moisture: f64,
}

/// Output of one model step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    pub temperature: f64,
    pub humidity: f64,
    pub moisture: f64,
}

/// Complete environment state snapshot, published once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub temperature: f64,
    pub humidity: f64,
    pub moisture: f64,
    pub sim_day: f64,
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
}

impl EnvironmentSnapshot {
    pub fn value(&self, sensor_type: SensorType) -> f64 {
        match sensor_type {
            SensorType::Temperature => self.temperature,
            SensorType::Humidity => self.humidity,
            SensorType::Moisture => self.moisture,
        }
    }
}

pub struct EnvironmentModel {
    temperature: f64,
    humidity: f64,
    moisture: f64,
    latitude: f64,
    tilt: Tilt,
    smoothing: TiltSmoothing,
    clock: SimClock,
    sim_day: f64,
    last_update: DateTime<Utc>,
    enable_noise: bool,
    tick: u64,
    rng: StdRng,
}

impl EnvironmentModel {
    /// Create a model anchored at wall time `now`.
    pub fn new(config: &EnvironmentConfig, now: DateTime<Utc>) -> Self {
        let mut rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        // Non-finite starting values are redrawn
        let initial = config
            .initial
            .filter(InitialConditions::is_finite)
            .unwrap_or_else(|| InitialConditions {
                temperature: rng.gen_range(15.0..20.0),
                humidity: 70.0,
                moisture: rng.gen_range(300.0..600.0),
            });

        Self {
            temperature: SensorType::Temperature.clamp_to_range(initial.temperature),
            humidity: SensorType::Humidity.clamp_to_range(initial.humidity),
            moisture: SensorType::Moisture.clamp_to_range(initial.moisture),
            latitude: config.latitude,
            tilt: Tilt::default(),
            smoothing: config.smoothing,
            clock: SimClock::new(now, config.start_day, config.time_acceleration),
            sim_day: config.start_day,
            last_update: now,
            enable_noise: config.enable_noise,
            tick: 0,
            rng,
        }
    }

    pub fn tilt(&self) -> Tilt {
        self.tilt
    }

    pub fn conditions(&self) -> Conditions {
        Conditions {
            temperature: self.temperature,
            humidity: self.humidity,
            moisture: self.moisture,
        }
    }

    pub fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            temperature: self.temperature,
            humidity: self.humidity,
            moisture: self.moisture,
            sim_day: self.sim_day,
            tick: self.tick,
            timestamp: self.last_update,
        }
    }

    /// Advance one tick at the sim day derived from the clock.
    pub fn step(&mut self, commands: &Commands, now: DateTime<Utc>) -> Conditions {
        let t_days = self.clock.sim_day_at(now);
        self.advance_at(t_days, commands, now)
    }

    /// Advance one tick at simulated day `t_days`, using the current wall time for rate effects.
    pub fn advance(&mut self, t_days: f64, commands: &Commands) -> Conditions {
        self.advance_at(t_days, commands, Utc::now())
    }

    /// Advance one tick at simulated day `t_days`. Evaporation and pump flow are integrated
    /// over the real time elapsed since the previous tick.
    pub fn advance_at(&mut self, t_days: f64, commands: &Commands, now: DateTime<Utc>) -> Conditions {
        let elapsed_real_s = seconds_between(self.last_update, now);

        self.update_temperature(t_days, commands);
        self.update_humidity(t_days, commands);
        self.update_moisture(t_days, commands, elapsed_real_s);

        self.sim_day = t_days;
        self.last_update = now;
        self.tick += 1;

        self.conditions()
    }

    fn update_temperature(&mut self, t_days: f64, commands: &Commands) {
        let lat_norm = self.latitude.abs() / 90.0;

        // Equator 27°C, poles -5°C
        let base = 27.0 - 32.0 * lat_norm;

        let seasonal_amplitude = 3.0 + 20.0 * lat_norm;
        let seasonal = seasonal_amplitude * (2.0 * PI * (t_days / 365.0 - 0.25)).sin();

        let daily_amplitude = 8.0 - 6.0 * lat_norm;
        let daily = daily_amplitude * (2.0 * PI * day_fraction(t_days) - PI / 2.0).sin();

        let years = self.clock.elapsed_years(t_days);
        let noise = self.gaussian(0.3 + 0.02 * years);

        let mut target = 0.0;
        if commands.fan {
            target += FAN_DELTA_C;
        }
        if commands.heater {
            target += HEATER_DELTA_C;
        }
        self.tilt.temperature = smooth(self.tilt.temperature, target, self.smoothing.temperature);

        let raw = base + seasonal + daily + noise + self.tilt.temperature;
        self.temperature = SensorType::Temperature.clamp_to_range(raw);
    }

    fn update_humidity(&mut self, t_days: f64, commands: &Commands) {
        let base = 70.0 - 0.5 * self.temperature.max(0.0);
        let daily = 5.0 * (2.0 * PI * day_fraction(t_days)).sin();
        let moisture_effect = (self.moisture - 500.0) / 200.0;
        let noise = self.gaussian(HUMIDITY_NOISE_STD);

        let mut target = 0.0;
        if commands.humidifier {
            target += HUMIDIFIER_DELTA_PCT;
        }
        if commands.dehumidifier {
            target += DEHUMIDIFIER_DELTA_PCT;
        }
        self.tilt.humidity = smooth(self.tilt.humidity, target, self.smoothing.humidity);

        let raw = base + daily + moisture_effect + noise + self.tilt.humidity;
        self.humidity = SensorType::Humidity.clamp_to_range(raw);
    }

    fn update_moisture(&mut self, t_days: f64, commands: &Commands, elapsed_real_s: f64) {
        let evap_mm_day = self.evaporation_rate(t_days);
        let loss = evap_mm_day / SECONDS_PER_DAY * elapsed_real_s * self.clock.acceleration();

        let target = if commands.pump { PUMP_DELTA } else { 0.0 };
        self.tilt.moisture = smooth(self.tilt.moisture, target, self.smoothing.moisture);

        let raw = self.moisture - loss + self.tilt.moisture;
        self.moisture = SensorType::Moisture.clamp_to_range(raw);
    }

    /// Evaporation in mm/day, capped at 12.
    fn evaporation_rate(&mut self, t_days: f64) -> f64 {
        // Waterlogged soil drains regardless of weather
        let base = if self.moisture > 700.0 {
            self.rng.gen_range(2.0..=MAX_EVAPORATION_MM_DAY)
        } else {
            0.0
        };

        let diurnal = (2.0 * PI * day_fraction(t_days)).sin().max(0.0);
        let evap = 1.5 * (self.temperature / 25.0).max(0.0) * (1.0 - self.humidity / 100.0) * diurnal;

        (evap + base).min(MAX_EVAPORATION_MM_DAY)
    }

    fn gaussian(&mut self, std_dev: f64) -> f64 {
        if !self.enable_noise {
            return 0.0;
        }
        Normal::new(0.0, std_dev)
            .map(|n| n.sample(&mut self.rng))
            .unwrap_or(0.0)
    }
}

/// First-order low-pass step toward `target`.
fn smooth(current: f64, target: f64, alpha: f64) -> f64 {
    current + alpha * (target - current)
}

fn day_fraction(t_days: f64) -> f64 {
    t_days.rem_euclid(1.0)
}
