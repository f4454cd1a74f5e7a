//! # Telemetry ingestion
//!
//! Two stages joined by a bounded queue:
//!
//! - **receive**: decodes messages from the `sensors/#` subscription and enqueues them
//! - **drain**: a single worker that owns the per-type [`RingBuffer`]s, publishes a copy of each
//!   buffer after every change and writes the reading to the [`crate::repo::ReadingStore`]
//!
//! When the queue is full the receive stage waits up to `enqueue_timeout_millis`, then drops the
//! new reading and counts it in [`IngestStats::dropped`]. After a stop the drain worker buffers
//! everything still queued but only persists until `flush_timeout_millis` runs out.

pub mod ingestor;
pub mod ring_buffer;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::transport::{CodecError, TransportError};

pub use ingestor::{BufferView, IngestHandle, TelemetryIngestor};
pub use ring_buffer::RingBuffer;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingest queue full, reading dropped")]
    QueueFull,
    #[error("ingestor stopped")]
    Closed,
    #[error("invalid reading: {0}")]
    Invalid(String),
    #[error("undecodable message: {0}")]
    Decode(#[from] CodecError),
    #[error("subscription failed: {0}")]
    Subscribe(#[from] TransportError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub queue_capacity: usize,
    pub enqueue_timeout_millis: u64,
    pub buffer_capacity: usize,
    pub persist_timeout_millis: u64,
    /// Budget for persisting queued readings after a stop
    pub flush_timeout_millis: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            enqueue_timeout_millis: 100,
            buffer_capacity: 100,
            persist_timeout_millis: 2_000,
            flush_timeout_millis: 5_000,
        }
    }
}

impl IngestConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_millis)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_millis)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_millis)
    }
}

/// Pipeline counters, updated with relaxed atomics.
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    malformed: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    persisted: AtomicU64,
    persist_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub enqueued: u64,
    pub dropped: u64,
    pub persisted: u64,
    pub persist_failures: u64,
}

impl IngestStats {
    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persist_failure(&self) {
        self.record_persist_failures(1);
    }

    pub(crate) fn record_persist_failures(&self, count: u64) {
        self.persist_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }
}
