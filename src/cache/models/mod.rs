/// 缓存数据模型
pub mod form;

pub use form::CachedFormPayload;
