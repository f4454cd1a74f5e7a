use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use super::{ReadingStore, StoreError};
use crate::domain::{SensorType, StoredReading};

/// Appends one JSON object per line to a file.
///
/// Each line is flushed before `insert` returns, so a crash loses at most the write in flight.
pub struct JsonlReadingStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlReadingStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!(path = %path.display(), "opened JSON-lines reading store");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReadingStore for JsonlReadingStore {
    async fn insert(&self, _sensor_type: SensorType, reading: &StoredReading) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(reading)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_lines_are_appended() {
        let path = std::env::temp_dir()
            .join(format!("greenhouse-{}", uuid::Uuid::new_v4()))
            .join("readings.jsonl");
        let store = JsonlReadingStore::open(&path).await.unwrap();

        for value in [20.5, 21.0] {
            let row = StoredReading {
                sensor_id: "t1".into(),
                sensor_type: SensorType::Temperature,
                value,
                timestamp: Utc::now(),
            };
            store.insert(SensorType::Temperature, &row).await.unwrap();
        }

        let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
        let rows: Vec<StoredReading> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].value, 21.0);
        assert_eq!(rows[0].sensor_type, SensorType::Temperature);

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }
}
