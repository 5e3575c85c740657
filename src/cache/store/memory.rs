use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{KvStore, PutOptions, StoreError};

#[derive(Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// 进程内存储，供测试替代 Redis
/// 使用 tokio 的时钟，测试中可以暂停并推进时间
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, options: PutOptions) -> Result<(), StoreError> {
        let now = Instant::now();
        let fresh_deadline = options
            .expiration_ttl_secs
            .map(|secs| now + Duration::from_secs(secs));

        let mut entries = self.entries.write().await;
        let expires_at = match entries.get(key) {
            Some(existing) if options.keep_ttl && existing.is_live(now) => existing.expires_at,
            _ => fresh_deadline,
        };
        entries.insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let current = match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.clone()),
            _ => None,
        };

        let (count, expires_at) = match current {
            Some(entry) => {
                let count = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| {
                        StoreError::Backend(format!("value at {} is not an integer", key))
                    })?;
                (count + 1, entry.expires_at)
            }
            None => (1, Some(now + Duration::from_secs(ttl_secs))),
        };

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: count.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(count)
    }
}
