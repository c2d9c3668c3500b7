//! Time bucketing and aggregate query generation.
//!
//! This module provides:
//! - Time bucket granularities used as grouping keys
//! - Parsing of ISO-8601 timestamps into epoch milliseconds
//! - Threshold validation for time-based point queries
//! - SQL generation for the grouped averages over the raw readings table

use crate::error::{IndexError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Raw readings table in the analytics store.
pub const READINGS_TABLE: &str = "sensor_readings";

/// Metric columns averaged per group, in output order.
pub const METRIC_COLUMNS: [&str; 3] = ["temperature", "humidity", "pressure"];

/// Granularity a timestamp is truncated to before grouping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    #[default]
    Minute,
    Hour,
    Day,
}

impl Display for TimeBucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeBucket::Minute => write!(f, "minute"),
            TimeBucket::Hour => write!(f, "hour"),
            TimeBucket::Day => write!(f, "day"),
        }
    }
}

impl FromStr for TimeBucket {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "minute" => Ok(TimeBucket::Minute),
            "hour" => Ok(TimeBucket::Hour),
            "day" => Ok(TimeBucket::Day),
            other => Err(IndexError::InvalidQuery(format!(
                "unknown time bucket '{}', expected minute, hour or day",
                other
            ))),
        }
    }
}

impl TimeBucket {
    /// SQL expression rendering the truncated bucket of `column` as
    /// `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn to_sql(&self, column: &str) -> String {
        format!(
            "strftime(date_trunc('{}', {}), '%Y-%m-%dT%H:%M:%SZ')",
            self, column
        )
    }
}

/// Parses an ISO-8601 timestamp into UTC epoch milliseconds.
///
/// Accepts RFC 3339 with any offset, naive date-times (`T` or space
/// separated, optional fractional seconds) taken as UTC, and bare dates.
pub fn parse_timestamp_ms(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Checks that a point query threshold looks like an ISO-8601 timestamp and
/// returns it without surrounding whitespace.
///
/// The returned value is what gets compared as a string afterwards; parsing
/// only rejects input that cannot be a timestamp at all.
pub fn validate_threshold(threshold: &str) -> Result<&str> {
    let trimmed = threshold.trim();
    if trimmed.is_empty() {
        return Err(IndexError::InvalidQuery(
            "timestamp_threshold must not be empty".to_string(),
        ));
    }
    parse_timestamp_ms(trimmed).map(|_| trimmed).ok_or_else(|| {
        IndexError::InvalidQuery(format!(
            "timestamp_threshold '{}' is not an ISO-8601 timestamp",
            threshold
        ))
    })
}

/// Builds the grouped average query over the raw readings table.
///
/// Output columns: `sensor_id, avg_temperature, avg_humidity, avg_pressure,
/// time_bucket`, ordered by sensor then bucket with null buckets last.
pub fn build_aggregate_query(table_name: &str, bucket: TimeBucket) -> String {
    let averages = METRIC_COLUMNS
        .iter()
        .map(|c| format!("AVG({c}) AS avg_{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT sensor_id, {averages}, {bucket_expr} AS time_bucket \
         FROM {table_name} \
         GROUP BY sensor_id, time_bucket \
         ORDER BY sensor_id ASC, time_bucket ASC NULLS LAST",
        bucket_expr = bucket.to_sql("recorded_at"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let utc = parse_timestamp_ms("2024-01-01T10:00:05Z").unwrap();
        assert_eq!(parse_timestamp_ms("2024-01-01T10:00:05").unwrap(), utc);
        assert_eq!(parse_timestamp_ms("2024-01-01 10:00:05").unwrap(), utc);
        assert_eq!(parse_timestamp_ms("2024-01-01T11:00:05+01:00").unwrap(), utc);
        assert_eq!(parse_timestamp_ms("2024-01-01T10:00:05.000Z").unwrap(), utc);
        assert_eq!(
            parse_timestamp_ms("2024-01-01").unwrap(),
            parse_timestamp_ms("2024-01-01T00:00:00Z").unwrap()
        );
        assert_eq!(parse_timestamp_ms("yesterday"), None);
        assert_eq!(parse_timestamp_ms(""), None);
    }

    #[test]
    fn test_bucket_parsing() {
        assert_eq!("minute".parse::<TimeBucket>().unwrap(), TimeBucket::Minute);
        assert_eq!("HOUR".parse::<TimeBucket>().unwrap(), TimeBucket::Hour);
        assert!(matches!("week".parse::<TimeBucket>(), Err(IndexError::InvalidQuery(_))));
    }

    #[test]
    fn test_validate_threshold() {
        assert!(validate_threshold("2024-01-01T00:00:00Z").is_ok());
        assert!(validate_threshold("2024-01-01").is_ok());
        assert!(matches!(validate_threshold(""), Err(IndexError::InvalidQuery(_))));
        assert!(matches!(validate_threshold("soon"), Err(IndexError::InvalidQuery(_))));
        assert!(matches!(validate_threshold("   "), Err(IndexError::InvalidQuery(_))));
        assert_eq!(
            validate_threshold(" 2023-01-01T00:00:00Z\n").unwrap(),
            "2023-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_aggregate_query_shape() {
        let sql = build_aggregate_query(READINGS_TABLE, TimeBucket::Minute);
        assert!(sql.starts_with("SELECT sensor_id, AVG(temperature) AS avg_temperature"));
        assert!(sql.contains("date_trunc('minute', recorded_at)"));
        assert!(sql.contains("FROM sensor_readings"));
        assert!(sql.contains("GROUP BY sensor_id, time_bucket"));
        assert!(sql.ends_with("NULLS LAST"));
    }
}
