use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ReadingStore, StoreError};
use crate::domain::{SensorType, StoredReading};

/// Keeps every inserted record in memory. Used when no durable store is configured.
#[derive(Debug, Default)]
pub struct MemoryReadingStore {
    rows: Mutex<Vec<StoredReading>>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<StoredReading> {
        self.rows.lock().clone()
    }

    pub fn count(&self, sensor_type: SensorType) -> usize {
        self.rows
            .lock()
            .iter()
            .filter(|r| r.sensor_type == sensor_type)
            .count()
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn insert(&self, _sensor_type: SensorType, reading: &StoredReading) -> Result<(), StoreError> {
        self.rows.lock().push(reading.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_insert_appends() {
        let store = MemoryReadingStore::new();
        let row = StoredReading {
            sensor_id: "h1".into(),
            sensor_type: SensorType::Humidity,
            value: 61.0,
            timestamp: Utc::now(),
        };
        store.insert(SensorType::Humidity, &row).await.unwrap();
        store.insert(SensorType::Humidity, &row).await.unwrap();

        assert_eq!(store.count(SensorType::Humidity), 2);
        assert_eq!(store.count(SensorType::Moisture), 0);
        assert_eq!(store.rows()[0], row);
    }
}
