use crate::ingest::EventSink;
use async_trait::async_trait;
use streamindex_core::{IndexError, SensorEvent, StreamingIndex};

#[async_trait]
impl EventSink for StreamingIndex {
    async fn store_event(&self, key: &str, event: SensorEvent) -> Result<(), IndexError> {
        StreamingIndex::store_event(self, key, event).await
    }
}
