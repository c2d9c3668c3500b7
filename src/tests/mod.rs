#[cfg(test)]
mod tests {
    use crate::ingest::{EventSink, EventSource, IngestStats, Ingestor, RetryPolicy};
    use crate::source::SourceMessage;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use mockall::predicate::*;
    use mockall::*;
    use std::sync::Arc;
    use std::time::Duration;
    use streamindex_core::{IndexError, SensorEvent};

    mock! {
        pub Source {}
        impl EventSource for Source {
            fn messages(&self) -> BoxStream<'static, SourceMessage>;
        }
    }

    mock! {
        pub Sink {}
        #[async_trait]
        impl EventSink for Sink {
            async fn store_event(&self, key: &str, event: SensorEvent) -> Result<(), IndexError>;
        }
    }

    fn source_of(lines: Vec<&'static str>) -> MockSource {
        let mut source = MockSource::new();
        source.expect_messages().times(1).return_once(move || {
            Box::pin(stream::iter(
                lines
                    .into_iter()
                    .enumerate()
                    .map(|(offset, line)| SourceMessage::from_line(line, offset as u64))
                    .collect::<Vec<_>>(),
            ))
        });
        source
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_undecodable_messages_do_not_stop_the_loop() {
        let source = source_of(vec![
            r#"{"id":"s1","temperature":20.0}"#,
            "not json at all",
            r#"{"temperature":"warm"}"#,
            r#"{"humidity":50.0}"#,
            r#"{"id":"s2","pressure":1013.2}"#,
        ]);

        let mut sink = MockSink::new();
        sink.expect_store_event()
            .with(eq("s1"), always())
            .times(1)
            .returning(|_, _| Ok(()));
        sink.expect_store_event()
            .with(eq("s2"), always())
            .times(1)
            .returning(|_, _| Ok(()));

        let ingestor = Ingestor::new(Box::new(source), Arc::new(sink));
        let stats = ingestor.run().await;

        assert_eq!(stats.received, 5);
        assert_eq!(stats.stored, 2);
        assert_eq!(stats.decode_failures, 3);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn test_transient_store_failure_is_retried() {
        let source = source_of(vec![r#"{"id":"s1","temperature":20.0}"#]);

        let mut sink = MockSink::new();
        let mut seq = Sequence::new();
        sink.expect_store_event()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(IndexError::Analytics("database is locked".to_string())));
        sink.expect_store_event()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let ingestor = Ingestor::with_retry_policy(Box::new(source), Arc::new(sink), fast_retry(3));
        let stats = ingestor.run().await;

        assert_eq!(stats.stored, 1);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn test_event_dropped_after_retries_exhausted() {
        let source = source_of(vec![
            r#"{"id":"bad","temperature":1.0}"#,
            r#"{"id":"good","temperature":2.0}"#,
        ]);

        let mut sink = MockSink::new();
        sink.expect_store_event()
            .with(eq("bad"), always())
            .times(3)
            .returning(|_, _| Err(IndexError::PointStore("disk full".to_string())));
        sink.expect_store_event()
            .with(eq("good"), always())
            .times(1)
            .returning(|_, _| Ok(()));

        let ingestor = Ingestor::with_retry_policy(Box::new(source), Arc::new(sink), fast_retry(3));
        let stats = ingestor.run().await;

        assert_eq!(stats.received, 2);
        assert_eq!(stats.stored, 1);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_message_key_overrides_payload_id() {
        let source = source_of(vec![
            "bus-key\t{\"id\":\"payload-id\",\"temperature\":3.0}",
            "orphan\t{\"temperature\":4.0}",
        ]);

        let mut sink = MockSink::new();
        sink.expect_store_event()
            .withf(|key, event| key == "bus-key" && event.id == "payload-id")
            .times(1)
            .returning(|_, _| Ok(()));
        sink.expect_store_event()
            .withf(|key, event| key == "orphan" && event.id == "orphan")
            .times(1)
            .returning(|_, _| Ok(()));

        let ingestor = Ingestor::new(Box::new(source), Arc::new(sink));
        let stats = ingestor.run().await;
        assert_eq!(stats.stored, 2);
    }

    #[tokio::test]
    async fn test_empty_source_finishes_immediately() {
        let source = source_of(vec![]);
        let mut sink = MockSink::new();
        sink.expect_store_event().never();

        let ingestor = Ingestor::new(Box::new(source), Arc::new(sink));
        let stats = ingestor.run().await;

        assert_eq!(stats, IngestStats::default());
        assert_eq!(ingestor.stats().await, stats);
    }
}
