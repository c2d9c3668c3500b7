//! Storage backends for the two projections of the event stream.
//!
//! - [`PointStore`]: ordered key/value store holding one record per event key.
//!   Implementations: `sled` (durable) and `memory` (volatile).
//! - [`AnalyticsStore`]: append-only raw readings with grouped aggregates.
//!   Implementation: `duckdb`.
//!
//! Each implementation synchronizes internally, so a single instance can be
//! shared between the ingestion task and request handlers without extra
//! locking.

pub mod duckdb;
pub mod memory;
pub mod sled;

use crate::aggregation::TimeBucket;
use crate::config::{AnalyticsConfig, IndexConfig};
use crate::error::{IndexError, Result};
use crate::event::{AggregateRow, RawReading};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Key/value pairs produced by a point store scan, in ascending key order.
pub type ScanStream = BoxStream<'static, Result<(String, Vec<u8>)>>;

/// Durable key/value store keyed by event id.
#[async_trait]
pub trait PointStore: Send + Sync + 'static {
    /// Stores `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Full scan in byte-lexicographic key order. Writes racing with the scan
    /// may or may not be observed.
    fn scan(&self) -> ScanStream;

    async fn len(&self) -> Result<usize>;

    /// Makes previous writes durable. A no-op for volatile stores.
    async fn flush(&self) -> Result<()>;
}

/// Append-only table of raw readings supporting grouped aggregates.
#[async_trait]
pub trait AnalyticsStore: Send + Sync + 'static {
    /// Creates the raw table if needed.
    async fn init(&self) -> Result<()>;

    async fn insert_reading(&self, reading: RawReading) -> Result<()>;

    /// Averages per `(sensor_id, bucket)`, sorted by sensor then bucket.
    async fn aggregate(&self, bucket: TimeBucket) -> Result<Vec<AggregateRow>>;

    async fn row_count(&self) -> Result<usize>;
}

/// Opens the point store selected by `config.engine`.
pub fn open_point_store(config: &IndexConfig) -> Result<Arc<dyn PointStore>> {
    match config.engine.as_str() {
        "sled" => Ok(Arc::new(sled::SledPointStore::open(config)?)),
        "memory" => Ok(Arc::new(memory::MemoryPointStore::new())),
        other => Err(IndexError::Init(format!(
            "unsupported point store engine '{}'",
            other
        ))),
    }
}

/// Opens the analytics store selected by `config.engine` and creates its schema.
pub async fn open_analytics_store(config: &AnalyticsConfig) -> Result<Arc<dyn AnalyticsStore>> {
    let store: Arc<dyn AnalyticsStore> = match config.engine.as_str() {
        "duckdb" => Arc::new(duckdb::DuckDbAnalytics::new_with_options(
            &config.connection,
            &config.options,
            config.dedupe_raw_rows,
        )?),
        other => {
            return Err(IndexError::Init(format!(
                "unsupported analytics engine '{}'",
                other
            )))
        }
    };
    store
        .init()
        .await
        .map_err(|e| IndexError::Init(e.to_string()))?;
    Ok(store)
}
