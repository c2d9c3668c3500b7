//! Ingestion loop: drains an [`EventSource`] into an [`EventSink`].
//!
//! Messages are decoded at the boundary. A message that cannot be decoded is
//! counted and skipped. A write that keeps failing is retried with
//! exponential backoff and then dropped. Neither case stops the loop.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use streamindex_core::{IndexError, SensorEvent};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::source::SourceMessage;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("undecodable message at offset {offset}: {source}")]
    Decode {
        offset: u64,
        #[source]
        source: IndexError,
    },

    #[error("message at offset {0} has neither a key nor an id")]
    MissingKey(u64),

    #[error("store failed after {attempts} attempts: {source}")]
    Store {
        attempts: u32,
        #[source]
        source: IndexError,
    },

    #[error("source error: {0}")]
    Source(String),
}

/// Produces the messages of one topic.
pub trait EventSource: Send + Sync {
    fn messages(&self) -> BoxStream<'static, SourceMessage>;
}

/// Destination of decoded events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn store_event(&self, key: &str, event: SensorEvent) -> Result<(), IndexError>;
}

/// Bounded exponential backoff for failed writes.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(31);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub received: u64,
    pub stored: u64,
    pub decode_failures: u64,
    pub retries: u64,
    pub dropped: u64,
}

pub struct Ingestor {
    source: Box<dyn EventSource>,
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
    stats: Arc<Mutex<IngestStats>>,
}

impl Ingestor {
    pub fn new(source: Box<dyn EventSource>, sink: Arc<dyn EventSink>) -> Self {
        Self::with_retry_policy(source, sink, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        source: Box<dyn EventSource>,
        sink: Arc<dyn EventSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            sink,
            retry,
            stats: Arc::new(Mutex::new(IngestStats::default())),
        }
    }

    /// Runs until the source ends and returns the final counters.
    pub async fn run(&self) -> IngestStats {
        let mut messages = self.source.messages();

        while let Some(message) = messages.next().await {
            self.stats.lock().await.received += 1;

            let (key, event) = match decode(&message) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!(offset = message.offset, error = %e, "skipping message");
                    self.stats.lock().await.decode_failures += 1;
                    continue;
                }
            };

            match self.store_with_retry(&key, event).await {
                Ok(()) => {
                    tracing::debug!(key = %key, offset = message.offset, "event stored");
                    self.stats.lock().await.stored += 1;
                }
                Err(e) => {
                    tracing::error!(key = %key, offset = message.offset, error = %e, "dropping event");
                    self.stats.lock().await.dropped += 1;
                }
            }
        }

        let stats = self.stats().await;
        tracing::info!(
            received = stats.received,
            stored = stats.stored,
            decode_failures = stats.decode_failures,
            retries = stats.retries,
            dropped = stats.dropped,
            "event source finished"
        );
        stats
    }

    pub async fn stats(&self) -> IngestStats {
        self.stats.lock().await.clone()
    }

    async fn store_with_retry(&self, key: &str, event: SensorEvent) -> Result<(), IngestError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.sink.store_event(key, event.clone()).await {
                Ok(()) => return Ok(()),
                Err(source) if attempt >= max_attempts => {
                    return Err(IngestError::Store {
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(key, attempt, ?delay, error = %e, "store failed, retrying");
                    self.stats.lock().await.retries += 1;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Decodes a message and resolves the key it is stored under.
///
/// The message key wins over the payload `id`. An event without an `id`
/// takes the message key as its id.
pub fn decode(message: &SourceMessage) -> Result<(String, SensorEvent), IngestError> {
    let mut event = SensorEvent::from_slice(&message.payload).map_err(|source| IngestError::Decode {
        offset: message.offset,
        source,
    })?;

    let key = match message.key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => key.to_string(),
        None if !event.id.is_empty() => event.id.clone(),
        None => return Err(IngestError::MissingKey(message.offset)),
    };
    if event.id.is_empty() {
        event.id = key.clone();
    }
    Ok((key, event))
}
