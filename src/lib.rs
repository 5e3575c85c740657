use std::sync::Arc;

use cache::{FormCache, KvStore, TimeoutStore};
use config::Config;
use middleware::RateLimiter;
use routes::form::FormRepository;

pub mod cache;
pub mod common;
pub mod config;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;
pub mod utils;

pub use router::build_router;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub forms: Arc<dyn FormRepository>,
    pub form_cache: FormCache,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// 限流器和表单缓存共用同一个存储，每次存储调用都有超时
    pub fn new(config: Config, store: Arc<dyn KvStore>, forms: Arc<dyn FormRepository>) -> Self {
        let store: Arc<dyn KvStore> = Arc::new(TimeoutStore::new(store, config.store_timeout()));

        Self {
            form_cache: FormCache::with_ttl(store.clone(), config.form_cache_ttl_secs),
            rate_limiter: Arc::new(RateLimiter::with_mode(store, config.counter_mode())),
            forms,
            config,
        }
    }
}
