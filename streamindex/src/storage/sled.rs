//! Durable point store backed by sled.
//!
//! ```toml
//! [index]
//! engine = "sled"
//! path = "streaming_db"
//! cache_capacity_bytes = 67108864
//! flush_every_ms = 500
//! ```
//!
//! Keys are stored as their UTF-8 bytes, so scans come back in
//! byte-lexicographic key order.

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::storage::{PointStore, ScanStream};
use async_trait::async_trait;
use futures::StreamExt;

#[derive(Clone)]
pub struct SledPointStore {
    db: sled::Db,
}

impl SledPointStore {
    /// Opens or creates the store at `config.path`.
    pub fn open(config: &IndexConfig) -> Result<Self> {
        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity_bytes)
            .flush_every_ms(config.flush_every_ms)
            .open()
            .map_err(|e| {
                IndexError::Init(format!(
                    "failed to open point index at {}: {}",
                    config.path.display(),
                    e
                ))
            })?;

        tracing::info!(
            path = %config.path.display(),
            recovered = db.was_recovered(),
            keys = db.len(),
            "opened sled point index"
        );
        Ok(Self { db })
    }
}

#[async_trait]
impl PointStore for SledPointStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn scan(&self) -> ScanStream {
        let iter = self.db.iter().map(|entry| -> Result<(String, Vec<u8>)> {
            let (key, value) = entry?;
            Ok((String::from_utf8_lossy(&key).into_owned(), value.to_vec()))
        });
        futures::stream::iter(iter).boxed()
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.db.len())
    }

    async fn flush(&self) -> Result<()> {
        let bytes = self.db.flush_async().await?;
        tracing::debug!(bytes, "flushed point index");
        Ok(())
    }
}
