use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{IngestConfig, IngestError, IngestStats, IngestStatsSnapshot, RingBuffer};
use crate::domain::{SensorReading, SensorType, StoredReading};
use crate::repo::ReadingStore;
use crate::transport::{
    decode, parse_reading_topic, InboundMessage, MessageStream, Subscriber, READINGS_FILTER,
};
use crate::utils::with_timeout_retry;

/// Published copy of one ring buffer, oldest first.
pub type BufferView = Arc<Vec<SensorReading>>;

const MAX_SENSOR_ID_LEN: usize = 128;

/// One value per sensor type.
#[derive(Debug)]
struct PerType<T> {
    temperature: T,
    humidity: T,
    moisture: T,
}

impl<T> PerType<T> {
    fn from_fn(mut f: impl FnMut(SensorType) -> T) -> Self {
        Self {
            temperature: f(SensorType::Temperature),
            humidity: f(SensorType::Humidity),
            moisture: f(SensorType::Moisture),
        }
    }

    fn map<U>(self, mut f: impl FnMut(T) -> U) -> PerType<U> {
        PerType {
            temperature: f(self.temperature),
            humidity: f(self.humidity),
            moisture: f(self.moisture),
        }
    }

    fn get(&self, sensor_type: SensorType) -> &T {
        match sensor_type {
            SensorType::Temperature => &self.temperature,
            SensorType::Humidity => &self.humidity,
            SensorType::Moisture => &self.moisture,
        }
    }

    fn get_mut(&mut self, sensor_type: SensorType) -> &mut T {
        match sensor_type {
            SensorType::Temperature => &mut self.temperature,
            SensorType::Humidity => &mut self.humidity,
            SensorType::Moisture => &mut self.moisture,
        }
    }
}

impl<A, B> PerType<(A, B)> {
    fn unzip(self) -> (PerType<A>, PerType<B>) {
        (
            PerType {
                temperature: self.temperature.0,
                humidity: self.humidity.0,
                moisture: self.moisture.0,
            },
            PerType {
                temperature: self.temperature.1,
                humidity: self.humidity.1,
                moisture: self.moisture.1,
            },
        )
    }
}

pub struct TelemetryIngestor;

impl TelemetryIngestor {
    /// Start the drain worker and, when a subscriber is given, the receive stage.
    ///
    /// The subscription is made before anything is spawned, so a failing broker is reported
    /// here rather than from a background task.
    pub async fn spawn(
        config: &IngestConfig,
        subscriber: Option<&dyn Subscriber>,
        store: Arc<dyn ReadingStore>,
        tracker: &TaskTracker,
        cancel: CancellationToken,
    ) -> Result<IngestHandle, IngestError> {
        let stream = match subscriber {
            Some(subscriber) => Some(subscriber.subscribe(READINGS_FILTER).await?),
            None => None,
        };

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(IngestStats::default());

        let (senders, views) = PerType::from_fn(|_| watch::channel(BufferView::default())).unzip();
        let buffers = senders.map(|view| (RingBuffer::new(config.buffer_capacity), view));

        let handle = IngestHandle {
            tx,
            views: Arc::new(views),
            stats: stats.clone(),
            enqueue_timeout: config.enqueue_timeout(),
        };

        let worker = DrainWorker {
            rx,
            buffers,
            store,
            stats,
            persist_timeout: config.persist_timeout(),
            flush_timeout: config.flush_timeout(),
        };
        tracker.spawn(worker.run(cancel.clone()));

        if let Some(stream) = stream {
            tracker.spawn(receive_loop(stream, handle.clone(), cancel));
        }

        info!(
            queue_capacity = config.queue_capacity,
            buffer_capacity = config.buffer_capacity,
            "telemetry ingestor started"
        );
        Ok(handle)
    }
}

/// Read and manual-append access to a running ingestor.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<SensorReading>,
    views: Arc<PerType<watch::Receiver<BufferView>>>,
    stats: Arc<IngestStats>,
    enqueue_timeout: Duration,
}

impl IngestHandle {
    /// Enqueue a reading directly, bypassing the transport.
    pub async fn append(&self, reading: SensorReading) -> Result<(), IngestError> {
        validate(&reading)?;
        self.enqueue(reading).await
    }

    /// Enqueue several readings in order, stopping at the first rejection.
    pub async fn append_many(
        &self,
        readings: impl IntoIterator<Item = SensorReading>,
    ) -> Result<usize, IngestError> {
        let mut count = 0;
        for reading in readings {
            self.append(reading).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Buffered readings of one type, oldest first.
    pub fn list_recent(&self, sensor_type: SensorType) -> Vec<SensorReading> {
        self.views.get(sensor_type).borrow().as_ref().clone()
    }

    pub fn list_recent_for(&self, sensor_type: SensorType, sensor_id: &str) -> Vec<SensorReading> {
        self.views
            .get(sensor_type)
            .borrow()
            .iter()
            .filter(|r| r.sensor_id == sensor_id)
            .cloned()
            .collect()
    }

    pub fn list_all(&self) -> Vec<SensorReading> {
        SensorType::ALL
            .into_iter()
            .flat_map(|t| self.list_recent(t))
            .collect()
    }

    /// Change notifications for one buffer.
    pub fn watch(&self, sensor_type: SensorType) -> watch::Receiver<BufferView> {
        self.views.get(sensor_type).clone()
    }

    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    async fn enqueue(&self, reading: SensorReading) -> Result<(), IngestError> {
        match self.tx.send_timeout(reading, self.enqueue_timeout).await {
            Ok(()) => {
                self.stats.record_enqueued();
                Ok(())
            }
            Err(SendTimeoutError::Timeout(reading)) => {
                self.stats.record_dropped();
                warn!(
                    sensor_id = %reading.sensor_id,
                    sensor_type = %reading.sensor_type,
                    timeout_ms = self.enqueue_timeout.as_millis() as u64,
                    "ingest queue full, dropping reading"
                );
                Err(IngestError::QueueFull)
            }
            Err(SendTimeoutError::Closed(_)) => Err(IngestError::Closed),
        }
    }
}

fn validate(reading: &SensorReading) -> Result<(), IngestError> {
    let len = reading.sensor_id.chars().count();
    if len == 0 || len > MAX_SENSOR_ID_LEN {
        return Err(IngestError::Invalid(format!(
            "sensor_id must be 1 to {MAX_SENSOR_ID_LEN} characters"
        )));
    }
    if !reading.value.is_finite() {
        return Err(IngestError::Invalid("value must be finite".to_string()));
    }
    Ok(())
}

fn decode_message(message: &InboundMessage) -> Result<SensorReading, IngestError> {
    let reading = decode(&message.payload)?;
    if let Some((topic_type, _)) = parse_reading_topic(&message.topic) {
        if topic_type != reading.sensor_type {
            return Err(IngestError::Invalid(format!(
                "topic type {topic_type} does not match payload type {}",
                reading.sensor_type
            )));
        }
    }
    if !reading.value.is_finite() {
        return Err(IngestError::Invalid("value must be finite".to_string()));
    }
    Ok(reading)
}

async fn receive_loop(mut stream: MessageStream, handle: IngestHandle, cancel: CancellationToken) {
    debug!(filter = READINGS_FILTER, "ingest receive loop started");

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next() => message,
        };
        let Some(message) = message else {
            warn!(filter = READINGS_FILTER, "subscription ended");
            break;
        };

        handle.stats.record_received();
        match decode_message(&message) {
            Ok(reading) => {
                if let Err(IngestError::Closed) = handle.enqueue(reading).await {
                    break;
                }
            }
            Err(e) => {
                handle.stats.record_malformed();
                warn!(topic = %message.topic, error = %e, "dropping malformed reading");
            }
        }
    }

    drop(stream);
    debug!("ingest receive loop stopped");
}

/// Sole owner of the ring buffers.
struct DrainWorker {
    rx: mpsc::Receiver<SensorReading>,
    buffers: PerType<(RingBuffer<SensorReading>, watch::Sender<BufferView>)>,
    store: Arc<dyn ReadingStore>,
    stats: Arc<IngestStats>,
    persist_timeout: Duration,
    flush_timeout: Duration,
}

impl DrainWorker {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                item = self.rx.recv() => match item {
                    Some(reading) => {
                        self.buffer(&reading);
                        self.persist(&reading).await;
                    }
                    None => break,
                },
            }
        }

        self.flush().await;
    }

    /// Drain what was accepted before the stop. Every reading is buffered; persistence stops
    /// at the flush deadline and the rest are counted as failed writes.
    async fn flush(&mut self) {
        self.rx.close();
        let deadline = Instant::now() + self.flush_timeout;
        let mut flushed = 0usize;
        let mut skipped = 0usize;

        while let Ok(reading) = self.rx.try_recv() {
            self.buffer(&reading);
            if Instant::now() >= deadline {
                skipped += 1;
                continue;
            }
            match tokio::time::timeout_at(deadline, self.persist(&reading)).await {
                Ok(()) => flushed += 1,
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            self.stats.record_persist_failures(skipped as u64);
            warn!(
                skipped,
                flush_timeout_ms = self.flush_timeout.as_millis() as u64,
                "flush deadline reached, readings buffered but not persisted"
            );
        }
        info!(flushed, "ingest drain stopped");
    }

    fn buffer(&mut self, reading: &SensorReading) {
        let (buffer, view) = self.buffers.get_mut(reading.sensor_type);
        buffer.push(reading.clone());
        view.send_replace(Arc::new(buffer.to_vec()));
    }

    async fn persist(&self, reading: &SensorReading) {
        let row = StoredReading::from(reading);
        let store = &self.store;
        let result = with_timeout_retry("persist", self.persist_timeout, || {
            store.insert(reading.sensor_type, &row)
        })
        .await;

        match result {
            Ok(()) => self.stats.record_persisted(),
            Err(e) => {
                self.stats.record_persist_failure();
                warn!(
                    sensor_id = %reading.sensor_id,
                    sensor_type = %reading.sensor_type,
                    error = %e,
                    "failed to persist reading"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{MemoryReadingStore, StoreError};
    use crate::transport::{encode, reading_topic, MemoryBroker, Publisher};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct FailingStore;

    #[async_trait]
    impl ReadingStore for FailingStore {
        async fn insert(&self, _: SensorType, _: &StoredReading) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }
    }

    struct StuckStore;

    #[async_trait]
    impl ReadingStore for StuckStore {
        async fn insert(&self, _: SensorType, _: &StoredReading) -> Result<(), StoreError> {
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    struct SlowStore;

    #[async_trait]
    impl ReadingStore for SlowStore {
        async fn insert(&self, _: SensorType, _: &StoredReading) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn reading(id: &str, sensor_type: SensorType, value: f64) -> SensorReading {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        SensorReading::new(id, sensor_type, value, ts)
    }

    async fn wait_for_len(rx: &mut watch::Receiver<BufferView>, len: usize) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| v.len() >= len))
            .await
            .expect("buffer never filled")
            .expect("ingestor stopped");
    }

    async fn wait_for_stats(handle: &IngestHandle, pred: impl Fn(&IngestStatsSnapshot) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !pred(&handle.stats()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stats never matched");
    }

    #[tokio::test]
    async fn test_append_is_listed_and_persisted() {
        let store = Arc::new(MemoryReadingStore::new());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let handle = TelemetryIngestor::spawn(
            &IngestConfig::default(),
            None,
            store.clone(),
            &tracker,
            cancel.clone(),
        )
        .await
        .unwrap();

        let mut rx = handle.watch(SensorType::Temperature);
        handle
            .append(reading("t1", SensorType::Temperature, 18.5))
            .await
            .unwrap();
        wait_for_len(&mut rx, 1).await;

        assert_eq!(
            handle.list_recent(SensorType::Temperature),
            vec![reading("t1", SensorType::Temperature, 18.5)]
        );
        assert!(handle.list_recent(SensorType::Humidity).is_empty());

        cancel.cancel();
        tracker.close();
        tracker.wait().await;
        assert_eq!(store.count(SensorType::Temperature), 1);
    }

    #[tokio::test]
    async fn test_list_recent_for_filters_by_id() {
        let tracker = TaskTracker::new();
        let handle = TelemetryIngestor::spawn(
            &IngestConfig::default(),
            None,
            Arc::new(MemoryReadingStore::new()),
            &tracker,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let mut rx = handle.watch(SensorType::Moisture);
        let count = handle
            .append_many(vec![
                reading("m1", SensorType::Moisture, 400.0),
                reading("m2", SensorType::Moisture, 410.0),
                reading("m1", SensorType::Moisture, 420.0),
            ])
            .await
            .unwrap();
        assert_eq!(count, 3);
        wait_for_len(&mut rx, 3).await;

        let m1: Vec<f64> = handle
            .list_recent_for(SensorType::Moisture, "m1")
            .iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(m1, vec![400.0, 420.0]);
        assert_eq!(handle.list_all().len(), 3);
    }

    #[tokio::test]
    async fn test_append_rejects_invalid_readings() {
        let tracker = TaskTracker::new();
        let handle = TelemetryIngestor::spawn(
            &IngestConfig::default(),
            None,
            Arc::new(MemoryReadingStore::new()),
            &tracker,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let empty_id = handle.append(reading("", SensorType::Humidity, 50.0)).await;
        assert!(matches!(empty_id, Err(IngestError::Invalid(_))));

        let nan = handle.append(reading("h1", SensorType::Humidity, f64::NAN)).await;
        assert!(matches!(nan, Err(IngestError::Invalid(_))));
        assert_eq!(handle.stats().enqueued, 0);
    }

    #[tokio::test]
    async fn test_receive_stage_decodes_and_drops_malformed() {
        let broker = MemoryBroker::new(64);
        let tracker = TaskTracker::new();
        let handle = TelemetryIngestor::spawn(
            &IngestConfig::default(),
            Some(&broker),
            Arc::new(MemoryReadingStore::new()),
            &tracker,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let mut rx = handle.watch(SensorType::Humidity);

        broker
            .publish("sensors/humidity/h1", b"{not json".to_vec())
            .await
            .unwrap();
        let valid = reading("h1", SensorType::Humidity, 62.25);
        broker
            .publish(
                &reading_topic(valid.sensor_type, &valid.sensor_id),
                encode(&valid).unwrap(),
            )
            .await
            .unwrap();
        wait_for_len(&mut rx, 1).await;

        assert_eq!(handle.list_recent(SensorType::Humidity), vec![valid]);
        let stats = handle.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.enqueued, 1);
    }

    #[tokio::test]
    async fn test_topic_type_mismatch_is_malformed() {
        let broker = MemoryBroker::new(64);
        let tracker = TaskTracker::new();
        let handle = TelemetryIngestor::spawn(
            &IngestConfig::default(),
            Some(&broker),
            Arc::new(MemoryReadingStore::new()),
            &tracker,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let r = reading("t1", SensorType::Temperature, 20.0);
        broker
            .publish("sensors/humidity/t1", encode(&r).unwrap())
            .await
            .unwrap();

        wait_for_stats(&handle, |s| s.malformed == 1).await;
        assert!(handle.list_all().is_empty());
    }

    #[tokio::test]
    async fn test_persist_failures_do_not_stop_drain() {
        let tracker = TaskTracker::new();
        let config = IngestConfig {
            persist_timeout_millis: 50,
            ..Default::default()
        };
        let handle = TelemetryIngestor::spawn(
            &config,
            None,
            Arc::new(FailingStore),
            &tracker,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        handle
            .append(reading("t1", SensorType::Temperature, 19.0))
            .await
            .unwrap();
        handle
            .append(reading("t1", SensorType::Temperature, 19.5))
            .await
            .unwrap();

        wait_for_stats(&handle, |s| s.persist_failures == 2).await;
        assert_eq!(handle.list_recent(SensorType::Temperature).len(), 2);
        assert_eq!(handle.stats().persisted, 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_after_timeout() {
        let tracker = TaskTracker::new();
        let config = IngestConfig {
            queue_capacity: 1,
            enqueue_timeout_millis: 10,
            persist_timeout_millis: 60_000,
            ..Default::default()
        };
        let handle = TelemetryIngestor::spawn(
            &config,
            None,
            Arc::new(StuckStore),
            &tracker,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let mut rx = handle.watch(SensorType::Temperature);

        // First reading parks the worker inside the stuck store, second fills the queue
        handle
            .append(reading("t1", SensorType::Temperature, 1.0))
            .await
            .unwrap();
        wait_for_len(&mut rx, 1).await;
        handle
            .append(reading("t1", SensorType::Temperature, 2.0))
            .await
            .unwrap();

        let third = handle
            .append(reading("t1", SensorType::Temperature, 3.0))
            .await;
        assert!(matches!(third, Err(IngestError::QueueFull)));
        assert_eq!(handle.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_queued_readings() {
        let store = Arc::new(MemoryReadingStore::new());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let handle = TelemetryIngestor::spawn(
            &IngestConfig::default(),
            None,
            store.clone(),
            &tracker,
            cancel.clone(),
        )
        .await
        .unwrap();

        for v in [1.0, 2.0, 3.0] {
            handle
                .append(reading("p1", SensorType::Moisture, v))
                .await
                .unwrap();
        }
        cancel.cancel();
        tracker.close();
        tracker.wait().await;

        assert_eq!(store.count(SensorType::Moisture), 3);
        assert!(matches!(
            handle.append(reading("p1", SensorType::Moisture, 4.0)).await,
            Err(IngestError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flush_is_bounded_by_deadline() {
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let config = IngestConfig {
            persist_timeout_millis: 2_000,
            flush_timeout_millis: 5_000,
            ..Default::default()
        };
        let handle = TelemetryIngestor::spawn(
            &config,
            None,
            Arc::new(SlowStore),
            &tracker,
            cancel.clone(),
        )
        .await
        .unwrap();

        for v in 0..50 {
            handle
                .append(reading("m1", SensorType::Moisture, v as f64))
                .await
                .unwrap();
        }

        let started = Instant::now();
        cancel.cancel();
        tracker.close();
        tracker.wait().await;

        // At most one in-flight write (two attempts) plus the flush budget
        assert!(started.elapsed() <= Duration::from_secs(10), "took {:?}", started.elapsed());
        assert_eq!(handle.list_recent(SensorType::Moisture).len(), 50);
        let stats = handle.stats();
        assert_eq!(stats.persisted, 0);
        assert_eq!(stats.persist_failures, 50);
    }
}
