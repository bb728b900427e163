//! Durable storage for relay metrics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, QueryBuilder, Row, Sqlite,
};
use std::str::FromStr;
use thiserror::Error;

/// SQLite caps bound parameters per statement; 8 columns × 100 rows stays
/// well below it.
const INSERT_CHUNK: usize = 100;

/// One relay outcome as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub timestamp: DateTime<Utc>,
    pub app_public_key: String,
    pub blockchain: String,
    pub service_node: Option<String>,
    /// Seconds.
    pub elapsed_time: f64,
    pub result: u16,
    pub bytes: u64,
    pub method: String,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for SinkError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Writes every row in one batch.
    async fn bulk_insert(&self, rows: &[MetricRow]) -> Result<(), SinkError>;
}

pub struct SqliteMetricsSink {
    pool: Pool<Sqlite>,
}

impl SqliteMetricsSink {
    /// Connects to `database_url`, creating the database and table if missing.
    ///
    /// # Errors
    /// Returns `SinkError::Database` if the connection or migration fails.
    pub async fn new(database_url: &str) -> Result<Self, SinkError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // every connection to an in-memory database would see its own copy
        let max_connections = if database_url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let sink = Self { pool };
        sink.migrate().await?;
        Ok(sink)
    }

    async fn migrate(&self) -> Result<(), SinkError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS relay_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                app_public_key TEXT NOT NULL,
                blockchain TEXT NOT NULL,
                service_node TEXT,
                elapsed_time REAL NOT NULL,
                result INTEGER NOT NULL,
                bytes INTEGER NOT NULL,
                method TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_relay_metrics_blockchain ON relay_metrics (blockchain, timestamp)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of stored rows.
    ///
    /// # Errors
    /// Returns `SinkError::Database` if the query fails.
    pub async fn count(&self) -> Result<i64, SinkError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM relay_metrics").fetch_one(&self.pool).await?;
        Ok(row.try_get("total")?)
    }

    /// Rows recorded for a blockchain, oldest first.
    ///
    /// # Errors
    /// Returns `SinkError::Database` if the query fails.
    pub async fn rows_for(&self, blockchain: &str) -> Result<Vec<MetricRow>, SinkError> {
        let rows = sqlx::query(
            r"
            SELECT timestamp, app_public_key, blockchain, service_node, elapsed_time, result, bytes, method
            FROM relay_metrics
            WHERE blockchain = ?
            ORDER BY id
            ",
        )
        .bind(blockchain)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<MetricRow, SinkError> {
                let result: i64 = row.try_get("result")?;
                let bytes: i64 = row.try_get("bytes")?;
                Ok(MetricRow {
                    timestamp: row.try_get("timestamp")?,
                    app_public_key: row.try_get("app_public_key")?,
                    blockchain: row.try_get("blockchain")?,
                    service_node: row.try_get("service_node")?,
                    elapsed_time: row.try_get("elapsed_time")?,
                    result: u16::try_from(result)
                        .map_err(|e| SinkError::Database(format!("column 'result': {e}")))?,
                    bytes: u64::try_from(bytes)
                        .map_err(|e| SinkError::Database(format!("column 'bytes': {e}")))?,
                    method: row.try_get("method")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl MetricsSink for SqliteMetricsSink {
    async fn bulk_insert(&self, rows: &[MetricRow]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO relay_metrics (timestamp, app_public_key, blockchain, service_node, elapsed_time, result, bytes, method) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.timestamp)
                    .push_bind(row.app_public_key.clone())
                    .push_bind(row.blockchain.clone())
                    .push_bind(row.service_node.clone())
                    .push_bind(row.elapsed_time)
                    .push_bind(i64::from(row.result))
                    .push_bind(i64::try_from(row.bytes).unwrap_or(i64::MAX))
                    .push_bind(row.method.clone());
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
