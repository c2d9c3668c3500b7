//! Volatile point store held in an ordered map.
//!
//! Same ordering and overwrite semantics as the sled store, without
//! persistence. Useful for tests and throwaway runs (`engine = "memory"`).

use crate::error::Result;
use crate::storage::{PointStore, ScanStream};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryPointStore {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryPointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PointStore for MemoryPointStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    // Copies the map up front; the lock is not held while the stream is polled.
    fn scan(&self) -> ScanStream {
        let entries: Vec<Result<(String, Vec<u8>)>> = self
            .entries
            .read()
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();
        futures::stream::iter(entries).boxed()
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
