// 缓存模块
// 键值存储抽象、缓存键、缓存数据结构和操作逻辑

pub mod keys;
pub mod models;
pub mod operations;
pub mod store;

// 重新导出常用类型，方便其他模块使用
pub use models::CachedFormPayload;
pub use operations::{CacheError, FormCache};
pub use store::{KvStore, MemoryStore, PutOptions, RedisStore, StoreError, TimeoutStore};
