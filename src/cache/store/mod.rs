/// 键值存储抽象
/// 限流器和表单缓存共享同一个存储，只依赖按键过期(TTL)，不依赖事务
mod memory;
mod redis_store;
mod timeout;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;
pub use self::timeout::TimeoutStore;

use std::time::Duration;

use async_trait::async_trait;

/// 存储后端错误，调用方一律按"存储不可用"处理
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store operation not supported: {0}")]
    Unsupported(&'static str),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// 写入选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PutOptions {
    /// 过期时间(秒)，None 表示永不过期
    pub expiration_ttl_secs: Option<u64>,
    /// 键存在时保留原有的剩余 TTL，只在新建时使用 `expiration_ttl_secs`
    pub keep_ttl: bool,
}

impl PutOptions {
    pub fn expire_in(secs: u64) -> Self {
        Self {
            expiration_ttl_secs: Some(secs),
            keep_ttl: false,
        }
    }

    /// 键存在则覆盖值并保留 TTL，不存在则以 `secs` 为 TTL 新建
    pub fn keep_ttl_or(secs: u64) -> Self {
        Self {
            expiration_ttl_secs: Some(secs),
            keep_ttl: true,
        }
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, value: Vec<u8>, options: PutOptions) -> Result<(), StoreError>;

    /// 删除不存在的键不算错误
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// 原子自增，首次创建时设置 TTL，之后不再改动 TTL
    async fn incr(&self, _key: &str, _ttl_secs: u64) -> Result<u64, StoreError> {
        Err(StoreError::Unsupported("incr"))
    }
}
