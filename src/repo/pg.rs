#![cfg(feature = "db")]
//! # PostgreSQL reading store
//!
//! One append-only table per sensor type (`readings_temperature`, `readings_humidity`,
//! `readings_moisture`). Table names come from [`SensorType`], never from input.

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

use super::{ReadingStore, StoreError};
use crate::domain::{SensorType, StoredReading};

pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        info!("connected to PostgreSQL reading store");
        Ok(Self { pool })
    }

    /// Create the per-type tables if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for sensor_type in SensorType::ALL {
            let table = table_name(sensor_type);
            let ddl = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    sensor_id TEXT NOT NULL,
                    sensor_type TEXT NOT NULL,
                    value DOUBLE PRECISION NOT NULL,
                    timestamp TIMESTAMPTZ NOT NULL
                )
                "#
            );
            sqlx::query(&ddl).execute(&self.pool).await?;
            info!(table = %table, "ensured reading table");
        }
        Ok(())
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn insert(&self, sensor_type: SensorType, reading: &StoredReading) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (sensor_id, sensor_type, value, timestamp) VALUES ($1, $2, $3, $4)",
            table_name(sensor_type)
        );
        sqlx::query(&sql)
            .bind(&reading.sensor_id)
            .bind(reading.sensor_type.as_ref())
            .bind(reading.value)
            .bind(reading.timestamp)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn table_name(sensor_type: SensorType) -> String {
    format!("readings_{sensor_type}")
}
