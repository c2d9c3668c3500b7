//! The streaming index: single entry point for writes and reads against the
//! point projection and the analytics projection.
//!
//! Writes go to both stores independently. There is no rollback: if the
//! analytics insert fails after the point write succeeded, the two
//! projections disagree for that event. Readers see whatever each store has
//! made visible at the time of the read.

use crate::aggregation::{parse_timestamp_ms, validate_threshold, TimeBucket};
use crate::config::Settings;
use crate::error::Result;
use crate::event::{AggregateRow, IndexedRecord, RawReading, SensorEvent, StoreStats};
use crate::storage::{open_analytics_store, open_point_store, AnalyticsStore, PointStore};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;

/// Stream of records in point store key order.
pub type RecordStream = BoxStream<'static, Result<IndexedRecord>>;

pub struct StreamingIndex {
    points: Arc<dyn PointStore>,
    analytics: Arc<dyn AnalyticsStore>,
}

impl StreamingIndex {
    /// Wraps already initialized stores.
    pub fn new(points: Arc<dyn PointStore>, analytics: Arc<dyn AnalyticsStore>) -> Self {
        Self { points, analytics }
    }

    /// Opens both stores from settings. Any failure is an
    /// [`IndexError::Init`](crate::error::IndexError::Init) and the caller
    /// must not serve with the result.
    pub async fn open(settings: &Settings) -> Result<Self> {
        let points = open_point_store(&settings.index)?;
        let analytics = open_analytics_store(&settings.analytics).await?;
        tracing::info!(
            index_engine = %settings.index.engine,
            analytics_engine = %settings.analytics.engine,
            "streaming index ready"
        );
        Ok(Self::new(points, analytics))
    }

    /// Records `event` under `key` in both projections.
    ///
    /// The point record is replaced (last write wins); the analytics row is
    /// appended with `sensor_id = key`. Errors are returned as-is, retrying is
    /// the caller's decision.
    #[tracing::instrument(level = "debug", skip(self, event))]
    pub async fn store_event(&self, key: &str, event: SensorEvent) -> Result<()> {
        let reading = RawReading {
            sensor_id: key.to_string(),
            temperature: event.temperature,
            humidity: event.humidity,
            pressure: event.pressure,
            recorded_at_ms: event.recorded_at.as_deref().and_then(parse_timestamp_ms),
        };
        if reading.recorded_at_ms.is_none() {
            tracing::debug!(key, recorded_at = ?event.recorded_at, "event has no usable time bucket");
        }

        let record = IndexedRecord::new(event);
        self.points.put(key, record.to_bytes()?).await?;
        self.analytics.insert_reading(reading).await?;
        Ok(())
    }

    /// Point lookup by key.
    pub async fn get_event(&self, key: &str) -> Result<Option<IndexedRecord>> {
        match self.points.get(key).await? {
            Some(bytes) => Ok(Some(IndexedRecord::from_bytes(key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns every record whose `timestamp >= threshold`.
    ///
    /// The comparison is on strings, so timestamps must be fixed-width,
    /// zero-padded ISO-8601 for it to agree with time order. Records stored
    /// without a timestamp carry `"unknown"`, which sorts after every
    /// digit-led threshold and is therefore always included.
    ///
    /// Results follow the point store's key order, **not** time order. The
    /// scan touches every key regardless of how selective the threshold is.
    pub async fn query_events(&self, threshold: &str) -> Result<Vec<IndexedRecord>> {
        let threshold = validate_threshold(threshold)?.to_string();
        self.snapshot()
            .try_filter(|record| {
                futures::future::ready(record.timestamp.as_str() >= threshold.as_str())
            })
            .try_collect()
            .await
    }

    /// Averages per sensor and minute bucket.
    pub async fn aggregate_metrics(&self) -> Result<Vec<AggregateRow>> {
        self.aggregate_metrics_by(TimeBucket::Minute).await
    }

    /// Averages per sensor and `bucket`, sorted by sensor then bucket.
    ///
    /// Only rows ingested by this process are covered when the analytics
    /// store is in-memory.
    pub async fn aggregate_metrics_by(&self, bucket: TimeBucket) -> Result<Vec<AggregateRow>> {
        self.analytics.aggregate(bucket).await
    }

    /// One full ordered scan of the point store.
    ///
    /// Dropping the stream ends the scan. Writes made while the stream is
    /// consumed may or may not appear.
    pub fn snapshot(&self) -> RecordStream {
        self.points
            .scan()
            .and_then(|(key, bytes)| futures::future::ready(IndexedRecord::from_bytes(&key, &bytes)))
            .boxed()
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            indexed_keys: self.points.len().await?,
            raw_rows: self.analytics.row_count().await?,
        })
    }

    /// Flushes the durable point store.
    pub async fn flush(&self) -> Result<()> {
        self.points.flush().await
    }
}
