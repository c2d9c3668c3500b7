//! Sensorstream: sensor event ingestion in front of a streaming index
//!
//! This crate drains a topic of JSON sensor readings into a
//! [`StreamingIndex`](streamindex_core::StreamingIndex), which keeps a durable
//! point index and an analytics table in step and serves both over HTTP.
//!
//! # Example
//!
//! ```rust,no_run
//! use sensorstream::{ChannelSource, EventSink, Ingestor, SourceMessage};
//! use std::sync::Arc;
//! use streamindex_core::config::{CliArgs, Settings};
//! use streamindex_core::StreamingIndex;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::new(&CliArgs::default())?;
//!     let index = Arc::new(StreamingIndex::open(&settings).await?);
//!
//!     let (tx, source) = ChannelSource::new(64);
//!     tx.send(SourceMessage::from_line(
//!         r#"{"id":"s1","temperature":21.5,"recordedAt":"2024-01-01T10:00:00Z"}"#,
//!         0,
//!     ))
//!     .await?;
//!     drop(tx);
//!
//!     let sink: Arc<dyn EventSink> = index.clone();
//!     let stats = Ingestor::new(Box::new(source), sink).run().await;
//!     println!("stored {} of {} messages", stats.stored, stats.received);
//!
//!     let averages = index.aggregate_metrics().await?;
//!     println!("{} aggregate groups", averages.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index_service;
pub mod ingest;
pub mod source;
pub mod tests;

pub use config::IngestSettings;
pub use ingest::{
    EventSink,
    EventSource,
    IngestError,
    IngestStats,
    Ingestor,
    RetryPolicy,
};
pub use source::{ChannelSource, FileSource, ReaderSource, SourceMessage};
