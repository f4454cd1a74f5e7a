//! # Reading persistence
//!
//! Append-only sink for ingested readings. Writes are best-effort: the ingestor logs failures
//! and moves on, and duplicate deliveries simply append twice.

pub mod jsonl;
pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{SensorType, StoredReading};

pub use jsonl::JsonlReadingStore;
pub use memory::MemoryReadingStore;
#[cfg(feature = "db")]
pub use pg::PgReadingStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "db")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn insert(&self, sensor_type: SensorType, reading: &StoredReading) -> Result<(), StoreError>;
}

/// Store selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    Memory,
    Jsonl {
        path: PathBuf,
    },
    Postgres {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        #[serde(default = "default_create_tables")]
        create_tables: bool,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_create_tables() -> bool {
    true
}

/// Build the configured store.
pub async fn connect_store(cfg: &StoreConfig) -> Result<Arc<dyn ReadingStore>> {
    match cfg {
        StoreConfig::Memory => Ok(Arc::new(MemoryReadingStore::new())),
        StoreConfig::Jsonl { path } => Ok(Arc::new(JsonlReadingStore::open(path).await?)),
        #[cfg(feature = "db")]
        StoreConfig::Postgres {
            url,
            max_connections,
            create_tables,
        } => {
            let store = PgReadingStore::connect(url, *max_connections).await?;
            if *create_tables {
                store.ensure_schema().await?;
            }
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "db"))]
        StoreConfig::Postgres { .. } => {
            anyhow::bail!("postgres store requested but the `db` feature is not enabled")
        }
    }
}
