//! DuckDB analytics store.
//!
//! Holds the raw `sensor_readings` table and answers grouped aggregate
//! queries over it. The implementation supports:
//! - In-memory (default) and file-backed databases
//! - Append-only inserts, optionally skipping duplicate
//!   `(sensor_id, recorded_at)` rows
//! - Per-bucket averages computed by the engine
//!
//! # Configuration
//!
//! ```toml
//! [analytics]
//! engine = "duckdb"
//! connection = ":memory:"  # Use ":memory:" for in-memory or a file path
//! dedupe_raw_rows = false
//! options = {
//!     threads = "4",       # Optional: worker threads
//!     max_memory = "1GB"   # Optional: memory limit
//! }
//! ```
//!
//! With the in-memory connection the table starts empty on every restart,
//! so aggregates only cover events ingested by the running process.

use crate::aggregation::{build_aggregate_query, TimeBucket, READINGS_TABLE};
use crate::error::{IndexError, Result};
use crate::event::{AggregateRow, RawReading};
use crate::storage::AnalyticsStore;
use async_trait::async_trait;
use duckdb::{params, Config, Connection};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// DuckDB-backed analytics store.
#[derive(Clone)]
pub struct DuckDbAnalytics {
    conn: Arc<Mutex<Connection>>,
    dedupe: bool,
}

impl DuckDbAnalytics {
    /// Opens a DuckDB database. The schema is created by [`AnalyticsStore::init`].
    pub fn new(connection_string: &str, config: Config, dedupe: bool) -> Result<Self> {
        let conn = if connection_string == ":memory:" {
            Connection::open_in_memory_with_flags(config)
        } else {
            Connection::open_with_flags(connection_string, config)
        }
        .map_err(|e| IndexError::Init(format!("failed to open duckdb '{}': {}", connection_string, e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dedupe,
        })
    }

    /// Creates an in-memory instance with default settings.
    pub fn new_in_memory() -> Result<Self> {
        Self::new(":memory:", Config::default(), false)
    }

    /// Creates an instance from a connection string and engine options.
    pub fn new_with_options(
        connection_string: &str,
        options: &HashMap<String, String>,
        dedupe: bool,
    ) -> Result<Self> {
        let mut config = Config::default();
        if let Some(threads) = options.get("threads") {
            let threads: i64 = threads
                .parse()
                .map_err(|_| IndexError::Init(format!("invalid threads option '{}'", threads)))?;
            config = config.threads(threads)?;
        }
        if let Some(limit) = options.get("max_memory") {
            config = config.max_memory(limit)?;
        }
        Self::new(connection_string, config, dedupe)
    }

    fn insert_sql(&self) -> String {
        let values = "CAST(? AS VARCHAR), CAST(? AS DOUBLE), CAST(? AS DOUBLE), CAST(? AS DOUBLE), \
                      epoch_ms(CAST(? AS BIGINT))";
        if self.dedupe {
            format!(
                "INSERT INTO {table} (sensor_id, temperature, humidity, pressure, recorded_at) \
                 SELECT {values} \
                 WHERE NOT EXISTS (\
                     SELECT 1 FROM {table} \
                     WHERE sensor_id = CAST(? AS VARCHAR) \
                     AND recorded_at IS NOT DISTINCT FROM epoch_ms(CAST(? AS BIGINT)))",
                table = READINGS_TABLE,
            )
        } else {
            format!(
                "INSERT INTO {table} (sensor_id, temperature, humidity, pressure, recorded_at) \
                 VALUES ({values})",
                table = READINGS_TABLE,
            )
        }
    }
}

#[async_trait]
impl AnalyticsStore for DuckDbAnalytics {
    async fn init(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        // No key constraint: the table is append-only and keeps redelivered rows.
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                sensor_id VARCHAR NOT NULL,
                temperature DOUBLE,
                humidity DOUBLE,
                pressure DOUBLE,
                recorded_at TIMESTAMP
            );
            "#,
            table = READINGS_TABLE
        ))
        .map_err(|e| IndexError::Init(format!("failed to create tables: {}", e)))?;

        Ok(())
    }

    async fn insert_reading(&self, reading: RawReading) -> Result<()> {
        let sql = self.insert_sql();
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&sql)?;

        if self.dedupe {
            stmt.execute(params![
                reading.sensor_id,
                reading.temperature,
                reading.humidity,
                reading.pressure,
                reading.recorded_at_ms,
                reading.sensor_id,
                reading.recorded_at_ms,
            ])?;
        } else {
            stmt.execute(params![
                reading.sensor_id,
                reading.temperature,
                reading.humidity,
                reading.pressure,
                reading.recorded_at_ms,
            ])?;
        }
        Ok(())
    }

    async fn aggregate(&self, bucket: TimeBucket) -> Result<Vec<AggregateRow>> {
        let query = build_aggregate_query(READINGS_TABLE, bucket);

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(params![])?;

        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(AggregateRow {
                sensor_id: row.get(0)?,
                avg_temperature: row.get(1)?,
                avg_humidity: row.get(2)?,
                avg_pressure: row.get(3)?,
                time_bucket: row.get(4)?,
            });
        }

        Ok(results)
    }

    async fn row_count(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", READINGS_TABLE),
            params![],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::parse_timestamp_ms;

    async fn store(dedupe: bool) -> DuckDbAnalytics {
        let store = DuckDbAnalytics::new(":memory:", Config::default(), dedupe).unwrap();
        store.init().await.unwrap();
        store
    }

    fn reading(sensor: &str, temperature: Option<f64>, at: &str) -> RawReading {
        RawReading {
            sensor_id: sensor.to_string(),
            temperature,
            humidity: None,
            pressure: Some(1000.0),
            recorded_at_ms: parse_timestamp_ms(at),
        }
    }

    #[tokio::test]
    async fn test_average_within_minute_bucket() {
        let store = store(false).await;
        store.insert_reading(reading("s1", Some(20.0), "2024-01-01T10:00:05Z")).await.unwrap();
        store.insert_reading(reading("s1", Some(22.0), "2024-01-01T10:00:40Z")).await.unwrap();

        let rows = store.aggregate(TimeBucket::Minute).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sensor_id, "s1");
        assert_eq!(rows[0].avg_temperature, Some(21.0));
        assert_eq!(rows[0].avg_pressure, Some(1000.0));
        assert_eq!(rows[0].time_bucket.as_deref(), Some("2024-01-01T10:00:00Z"));
    }

    #[tokio::test]
    async fn test_all_null_metric_averages_to_null() {
        let store = store(false).await;
        store.insert_reading(reading("s1", None, "2024-01-01T10:00:05Z")).await.unwrap();
        store.insert_reading(reading("s1", None, "2024-01-01T10:00:06Z")).await.unwrap();

        let rows = store.aggregate(TimeBucket::Minute).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].avg_temperature, None);
        assert_eq!(rows[0].avg_humidity, None);
    }

    #[tokio::test]
    async fn test_groups_are_sorted_by_sensor_then_bucket() {
        let store = store(false).await;
        store.insert_reading(reading("s2", Some(1.0), "2024-01-01T10:01:00Z")).await.unwrap();
        store.insert_reading(reading("s1", Some(2.0), "2024-01-01T10:02:00Z")).await.unwrap();
        store.insert_reading(reading("s1", Some(3.0), "2024-01-01T10:01:30Z")).await.unwrap();
        store.insert_reading(reading("s1", Some(4.0), "not a timestamp")).await.unwrap();

        let rows = store.aggregate(TimeBucket::Minute).await.unwrap();
        let keys: Vec<(&str, Option<&str>)> = rows
            .iter()
            .map(|r| (r.sensor_id.as_str(), r.time_bucket.as_deref()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("s1", Some("2024-01-01T10:01:00Z")),
                ("s1", Some("2024-01-01T10:02:00Z")),
                ("s1", None),
                ("s2", Some("2024-01-01T10:01:00Z")),
            ]
        );
    }

    #[tokio::test]
    async fn test_hour_bucket_merges_minutes() {
        let store = store(false).await;
        store.insert_reading(reading("s1", Some(10.0), "2024-01-01T10:01:00Z")).await.unwrap();
        store.insert_reading(reading("s1", Some(20.0), "2024-01-01T10:59:00Z")).await.unwrap();

        let rows = store.aggregate(TimeBucket::Hour).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].avg_temperature, Some(15.0));
        assert_eq!(rows[0].time_bucket.as_deref(), Some("2024-01-01T10:00:00Z"));
    }

    #[tokio::test]
    async fn test_duplicates_are_appended_by_default() {
        let store = store(false).await;
        let r = reading("s1", Some(20.0), "2024-01-01T10:00:05Z");
        store.insert_reading(r.clone()).await.unwrap();
        store.insert_reading(r).await.unwrap();
        store.insert_reading(reading("s1", Some(26.0), "2024-01-01T10:00:10Z")).await.unwrap();

        assert_eq!(store.row_count().await.unwrap(), 3);
        // The redelivered reading pulls the average toward itself.
        let rows = store.aggregate(TimeBucket::Minute).await.unwrap();
        assert_eq!(rows[0].avg_temperature, Some(22.0));
    }

    #[tokio::test]
    async fn test_dedupe_skips_repeated_sensor_and_time() {
        let store = store(true).await;
        let r = reading("s1", Some(20.0), "2024-01-01T10:00:05Z");
        store.insert_reading(r.clone()).await.unwrap();
        store.insert_reading(r).await.unwrap();
        store.insert_reading(reading("s1", Some(26.0), "2024-01-01T10:00:10Z")).await.unwrap();
        store.insert_reading(reading("s2", Some(26.0), "2024-01-01T10:00:10Z")).await.unwrap();

        assert_eq!(store.row_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_new_in_memory_instance_is_empty() {
        let first = store(false).await;
        first.insert_reading(reading("s1", Some(1.0), "2024-01-01T00:00:00Z")).await.unwrap();
        assert_eq!(first.row_count().await.unwrap(), 1);

        let second = store(false).await;
        assert_eq!(second.row_count().await.unwrap(), 0);
        assert!(second.aggregate(TimeBucket::Minute).await.unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_thread_option() {
        let mut options = HashMap::new();
        options.insert("threads".to_string(), "many".to_string());
        assert!(matches!(
            DuckDbAnalytics::new_with_options(":memory:", &options, false),
            Err(IndexError::Init(_))
        ));
    }
}
