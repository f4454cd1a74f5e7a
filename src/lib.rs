//! Greenhouse climate simulator feeding a buffered telemetry pipeline.
//!
//! An environment model advances on its own tick, hysteresis controllers switch actuators
//! based on the latest snapshot, virtual sensors sample that snapshot, and a gateway publishes
//! the samples to a pub/sub transport. A two-stage ingestor subscribes to those readings, keeps
//! the most recent ones per sensor type in memory and persists them.

pub mod config;
pub mod controller;
pub mod domain;
pub mod ingest;
pub mod repo;
pub mod sensors;
pub mod simulation;
pub mod state;
pub mod telemetry;
pub mod transport;
pub mod utils;
