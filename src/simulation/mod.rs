//! # Environment Simulation Module
//!
//! Tick-based greenhouse climate (temperature, humidity, soil moisture).
//!
//! ## Components
//!
//! - **Clock**: maps wall time onto accelerated simulated days
//! - **Environment**: the physical model and its per-tick snapshot
//! - **Runner**: the loop that advances the model and publishes snapshots
//!
//! ## Usage
//!
//! ```rust
//! use chrono::Utc;
//! use greenhouse_telemetry::simulation::{EnvironmentConfig, EnvironmentModel};
//! use greenhouse_telemetry::state::Commands;
//!
//! let config = EnvironmentConfig::default().with_latitude(59.3).with_random_seed(42);
//! let mut model = EnvironmentModel::new(&config, Utc::now());
//!
//! let conditions = model.advance(120.5, &Commands::default());
//! assert!((-20.0..=50.0).contains(&conditions.temperature));
//! ```

pub mod clock;
pub mod environment;
pub mod runner;

pub use clock::{SimClock, DEFAULT_TIME_ACCELERATION};
pub use environment::{
    Conditions, EnvironmentConfig, EnvironmentModel, EnvironmentSnapshot, InitialConditions,
    Tilt, TiltSmoothing,
};
pub use runner::EnvironmentLoop;
