/// 缓存键模块
/// 所有写入键值存储的键都在这里生成

/// 公开表单缓存键前缀
const FORM_PREFIX: &str = "form:";

/// 生成公开表单缓存键
pub fn form_key(public_id: &str) -> String {
    format!("{}{}", FORM_PREFIX, public_id)
}

/// 生成限流计数键: 策略前缀:身份:路由
pub fn rate_limit_key(key_prefix: &str, identity: &str, route: &str) -> String {
    format!("{}:{}:{}", key_prefix, identity, route)
}
