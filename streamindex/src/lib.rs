/*!
# Streamindex: dual-projection index for sensor event streams

Streamindex keeps two views of a stream of sensor readings in step:

- a **point index** holding the latest record per event key, persisted in
  sled and scanned in key order
- an **analytics table** of raw readings in DuckDB, answering per-sensor,
  per-minute averages

Both are written by [`StreamingIndex::store_event`](index::StreamingIndex::store_event)
and read through an axum HTTP/WebSocket [`service`].

## Consistency

The two writes are independent. A crash between them leaves the
projections disagreeing for that event, and redelivered events add
duplicate analytics rows unless `analytics.dedupe_raw_rows` is set. The
analytics table is in-memory by default, so aggregates restart empty
while point lookups keep their full history.

## Usage

```rust,no_run
use streamindex_core::config::{CliArgs, Settings};
use streamindex_core::event::SensorEvent;
use streamindex_core::index::StreamingIndex;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::new(&CliArgs::default())?;
    let index = StreamingIndex::open(&settings).await?;

    let event = SensorEvent::from_slice(br#"{"id":"s1","temperature":21.5,"recordedAt":"2024-01-01T10:00:00Z"}"#)?;
    index.store_event("s1", event).await?;

    let recent = index.query_events("2024-01-01T00:00:00Z").await?;
    let averages = index.aggregate_metrics().await?;
    println!("{} records, {} groups", recent.len(), averages.len());
    Ok(())
}
```
*/

pub mod aggregation;
pub mod config;
pub mod error;
pub mod event;
pub mod index;
pub mod service;
pub mod storage;

pub use aggregation::TimeBucket;
pub use error::IndexError;
pub use event::{AggregateRow, IndexedRecord, SensorEvent, StoreStats};
pub use index::StreamingIndex;
pub use storage::{AnalyticsStore, PointStore};
