//! Sensor event data model.
//!
//! Three shapes flow through the system:
//! - [`SensorEvent`]: the decoded ingestion payload
//! - [`IndexedRecord`]: what the point index stores under each key
//! - [`AggregateRow`]: one grouped result from the analytics store
//!
//! Optional metrics stay `None` end to end. A missing temperature is
//! serialized as `null`, never as `0.0`.

use crate::error::{IndexError, Result};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Timestamp recorded on an [`IndexedRecord`] whose event carried no `recordedAt`.
pub const UNKNOWN_TIMESTAMP: &str = "unknown";

/// A single sensor reading as delivered by the event source.
///
/// The reading time may arrive as `recordedAt`, `recorded_at` or
/// `timestamp`. When several are present, `recordedAt` wins, then
/// `recorded_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireSensorEvent")]
pub struct SensorEvent {
    /// External key of the event. Filled from the message key when the
    /// payload omits it.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub recorded_at: Option<String>,
}

/// Payload shape accepted on input, with every timestamp spelling kept apart.
#[derive(Deserialize)]
struct WireSensorEvent {
    #[serde(default)]
    id: String,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
    #[serde(default)]
    pressure: Option<f64>,
    #[serde(default, rename = "recordedAt")]
    recorded_at_camel: Option<String>,
    #[serde(default, rename = "recorded_at")]
    recorded_at_snake: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl From<WireSensorEvent> for SensorEvent {
    fn from(wire: WireSensorEvent) -> Self {
        Self {
            id: wire.id,
            temperature: wire.temperature,
            humidity: wire.humidity,
            pressure: wire.pressure,
            recorded_at: wire
                .recorded_at_camel
                .or(wire.recorded_at_snake)
                .or(wire.timestamp),
        }
    }
}

impl SensorEvent {
    /// Decodes a JSON payload. Shape violations (a string temperature, a
    /// top-level array) are decode errors.
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| IndexError::Decode(e.to_string()))
    }
}

/// The unit stored in the point index, keyed by event id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    pub data: SensorEvent,
    pub timestamp: String,
}

impl IndexedRecord {
    pub fn new(event: SensorEvent) -> Self {
        let timestamp = event
            .recorded_at
            .clone()
            .unwrap_or_else(|| UNKNOWN_TIMESTAMP.to_string());
        Self { data: event, timestamp }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| IndexError::PointStore(e.to_string()))
    }

    pub fn from_bytes(key: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| IndexError::CorruptRecord {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}

/// Averages for one `(sensor_id, time_bucket)` group.
///
/// On the wire this is a positional array
/// `[sensorId, avgTemperature, avgHumidity, avgPressure, timeBucket]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub sensor_id: String,
    pub avg_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub avg_pressure: Option<f64>,
    pub time_bucket: Option<String>,
}

impl Serialize for AggregateRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        (
            &self.sensor_id,
            self.avg_temperature,
            self.avg_humidity,
            self.avg_pressure,
            &self.time_bucket,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AggregateRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let (sensor_id, avg_temperature, avg_humidity, avg_pressure, time_bucket) =
            <(String, Option<f64>, Option<f64>, Option<f64>, Option<String>)>::deserialize(
                deserializer,
            )?;
        Ok(Self {
            sensor_id,
            avg_temperature,
            avg_humidity,
            avg_pressure,
            time_bucket,
        })
    }
}

/// A raw analytics row, one per stored event.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub sensor_id: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    /// Milliseconds since the Unix epoch, UTC. `None` when `recordedAt` was
    /// absent or not a recognizable timestamp.
    pub recorded_at_ms: Option<i64>,
}

/// Entry counts of both projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub indexed_keys: usize,
    pub raw_rows: usize,
}
