use std::sync::Arc;

use serde::Serialize;

use crate::cache::keys::form_key;
use crate::cache::models::CachedFormPayload;
use crate::cache::store::{KvStore, PutOptions, StoreError};

/// 公开表单缓存的默认过期时间（秒）
pub const FORM_CACHE_EXPIRE: u64 = 3600; // 1小时

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cached form payload is corrupt: {0}")]
    Decode(serde_json::Error),
    #[error("form payload cannot be projected: {0}")]
    Projection(serde_json::Error),
}

/// 公开表单读穿缓存
/// 缓存写入是尽力而为的，任何失败都不会阻塞主流程
#[derive(Clone)]
pub struct FormCache {
    store: Arc<dyn KvStore>,
    default_ttl: u64,
}

impl FormCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_ttl(store, FORM_CACHE_EXPIRE)
    }

    pub fn with_ttl(store: Arc<dyn KvStore>, default_ttl: u64) -> Self {
        Self { store, default_ttl }
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    pub async fn try_get(&self, public_id: &str) -> Result<Option<CachedFormPayload>, CacheError> {
        let bytes = match self.store.get(&form_key(public_id)).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let payload = serde_json::from_slice(&bytes).map_err(CacheError::Decode)?;
        Ok(Some(payload))
    }

    /// 命中返回缓存内容；未命中、存储故障、数据损坏都按未命中处理
    pub async fn get(&self, public_id: &str) -> Option<CachedFormPayload> {
        match self.try_get(public_id).await {
            Ok(Some(payload)) => {
                tracing::debug!("Form cache hit: {}", public_id);
                Some(payload)
            }
            Ok(None) => {
                tracing::debug!("Form cache miss: {}", public_id);
                None
            }
            Err(e) => {
                tracing::warn!("Form cache read failed for {}, treating as miss: {}", public_id, e);
                None
            }
        }
    }

    pub async fn try_set<T: Serialize + ?Sized>(
        &self,
        public_id: &str,
        payload: &T,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        let projected = CachedFormPayload::project(payload).map_err(CacheError::Projection)?;
        let bytes = serde_json::to_vec(&projected).map_err(CacheError::Projection)?;

        self.store
            .put(&form_key(public_id), bytes, PutOptions::expire_in(ttl_secs))
            .await?;
        Ok(())
    }

    pub async fn set<T: Serialize + ?Sized>(&self, public_id: &str, payload: &T, ttl_secs: u64) {
        match self.try_set(public_id, payload, ttl_secs).await {
            Ok(()) => tracing::debug!("Set form to cache: {} (ttl {}s)", public_id, ttl_secs),
            Err(e) => tracing::warn!("Failed to cache form {}: {}", public_id, e),
        }
    }

    pub async fn set_default_ttl<T: Serialize + ?Sized>(&self, public_id: &str, payload: &T) {
        self.set(public_id, payload, self.default_ttl).await
    }

    pub async fn try_invalidate(&self, public_id: &str) -> Result<(), CacheError> {
        self.store.delete(&form_key(public_id)).await?;
        Ok(())
    }

    pub async fn invalidate(&self, public_id: &str) {
        match self.try_invalidate(public_id).await {
            Ok(()) => tracing::debug!("Invalidated form cache: {}", public_id),
            Err(e) => tracing::warn!("Failed to invalidate form cache {}: {}", public_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct BrokenStore;

    #[async_trait]
    impl KvStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn put(&self, _: &str, _: Vec<u8>, _: PutOptions) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
    }

    fn memory_cache() -> (MemoryStore, FormCache) {
        let store = MemoryStore::new();
        let cache = FormCache::new(Arc::new(store.clone()));
        (store, cache)
    }

    #[tokio::test]
    async fn test_set_strips_non_public_fields() {
        let (_, cache) = memory_cache();
        cache
            .set(
                "abc123",
                &json!({
                    "schema": {"fields": []},
                    "settings": {},
                    "requireAuth": false,
                    "title": "leak-me",
                    "status": "draft",
                }),
                3600,
            )
            .await;

        let payload = cache.get("abc123").await.expect("cache hit");
        let encoded = serde_json::to_value(&payload).unwrap();
        assert!(encoded.get("title").is_none());
        assert!(encoded.get("status").is_none());
        assert_eq!(encoded["schema"], json!({"fields": []}));
    }

    #[tokio::test]
    async fn test_invalidate_absent_key_is_noop() {
        let (_, cache) = memory_cache();
        assert!(cache.try_invalidate("missing").await.is_ok());
        assert!(cache.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let (_, cache) = memory_cache();
        cache.set("f1", &json!({"schema": {"fields": []}}), 60).await;
        assert!(cache.get("f1").await.is_some());

        cache.invalidate("f1").await;
        assert!(cache.get("f1").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let (store, cache) = memory_cache();
        store
            .put(&form_key("bad"), b"{not json".to_vec(), PutOptions::expire_in(60))
            .await
            .unwrap();

        assert!(matches!(cache.try_get("bad").await, Err(CacheError::Decode(_))));
        assert!(cache.get("bad").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_with_ttl() {
        let (_, cache) = memory_cache();
        cache.set("f2", &json!({"schema": {}}), 10).await;

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get("f2").await.is_some());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("f2").await.is_none());
    }

    #[tokio::test]
    async fn test_store_failures_degrade_silently() {
        let cache = FormCache::new(Arc::new(BrokenStore));

        assert!(matches!(cache.try_get("x").await, Err(CacheError::Store(_))));
        assert!(cache.get("x").await.is_none());
        // 写入和失效失败都只记录日志
        cache.set("x", &json!({"schema": {}}), 60).await;
        cache.invalidate("x").await;
        assert!(cache.try_invalidate("x").await.is_err());
    }
}
