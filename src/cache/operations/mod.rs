/// 缓存操作
pub mod form;

pub use form::{CacheError, FormCache, FORM_CACHE_EXPIRE};
