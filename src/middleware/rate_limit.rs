use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, OriginalUri, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    cache::{
        keys::rate_limit_key,
        store::{KvStore, PutOptions, StoreError},
    },
    utils::Claims,
};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// 限流策略：窗口内最多 `limit` 次请求，窗口长度 `window_secs` 秒
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window_secs: u64,
    pub key_prefix: String,
}

impl RateLimitPolicy {
    pub fn new(limit: u32, window_secs: u64, key_prefix: impl Into<String>) -> Self {
        Self {
            limit: limit.max(1),
            window_secs: window_secs.max(1),
            key_prefix: key_prefix.into(),
        }
    }

    /// 普通接口: 60 次 / 60 秒
    pub fn default_policy() -> Self {
        Self::new(60, 60, "default")
    }

    /// 敏感接口: 5 次 / 300 秒
    pub fn strict() -> Self {
        Self::new(5, 300, "strict")
    }

    /// 按用户计数: limit 次 / 1 小时
    pub fn per_user(limit: u32) -> Self {
        Self::new(limit, 3600, "user")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        limit: u32,
        remaining: u32,
        reset_after_secs: u64,
    },
    Denied {
        limit: u32,
        retry_after_secs: u64,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// 计数方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CounterMode {
    /// 先读后写，不保证原子性，并发时可能少计
    #[default]
    ReadWrite,
    /// 使用存储的原子自增
    AtomicIncrement,
}

/// 调用方身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Ip(String),
    User(String),
    ApiKey(String),
}

impl Identity {
    /// API key 只保存摘要，原始 key 不写入存储
    pub fn api_key(raw: &str) -> Self {
        let digest = Sha256::digest(raw.as_bytes());
        let hex: String = digest.iter().take(16).map(|b| format!("{:02x}", b)).collect();
        Identity::ApiKey(hex)
    }

    /// 按用户计数时，非用户身份带上类型标记，避免和用户 id 共用计数
    pub fn tagged(self) -> Self {
        match self {
            Identity::Ip(v) => Identity::Ip(format!("ip:{}", v)),
            Identity::ApiKey(v) => Identity::ApiKey(format!("apiKey:{}", v)),
            user => user,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Identity::Ip(v) | Identity::User(v) | Identity::ApiKey(v) => v,
        }
    }
}

/// 固定窗口限流器
/// 计数的过期时间只在窗口第一次请求时设置，窗口内所有计数一起过期
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    mode: CounterMode,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_mode(store, CounterMode::default())
    }

    pub fn with_mode(store: Arc<dyn KvStore>, mode: CounterMode) -> Self {
        Self { store, mode }
    }

    pub async fn try_check(
        &self,
        identity: &Identity,
        route: &str,
        policy: &RateLimitPolicy,
    ) -> Result<Decision, StoreError> {
        let key = rate_limit_key(&policy.key_prefix, identity.as_str(), route);

        match self.mode {
            CounterMode::ReadWrite => self.read_write(&key, policy).await,
            CounterMode::AtomicIncrement => self.atomic(&key, policy).await,
        }
    }

    /// 存储故障时放行（fail open），只记录日志
    pub async fn check(&self, identity: &Identity, route: &str, policy: &RateLimitPolicy) -> Decision {
        match self.try_check(identity, route, policy).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    "Rate limit store failed for {}:{}:{}, allowing request: {}",
                    policy.key_prefix,
                    identity.as_str(),
                    route,
                    e
                );
                Decision::Allowed {
                    limit: policy.limit,
                    remaining: policy.limit,
                    reset_after_secs: policy.window_secs,
                }
            }
        }
    }

    async fn read_write(&self, key: &str, policy: &RateLimitPolicy) -> Result<Decision, StoreError> {
        let count = match self.store.get(key).await? {
            Some(bytes) => parse_count(key, &bytes),
            None => 0,
        };

        if count >= u64::from(policy.limit) {
            return Ok(Decision::Denied {
                limit: policy.limit,
                retry_after_secs: policy.window_secs,
            });
        }

        // 新窗口设置 TTL，已有窗口保留原 TTL
        let options = if count == 0 {
            PutOptions::expire_in(policy.window_secs)
        } else {
            PutOptions::keep_ttl_or(policy.window_secs)
        };
        self.store
            .put(key, (count + 1).to_string().into_bytes(), options)
            .await?;

        Ok(Decision::Allowed {
            limit: policy.limit,
            remaining: (u64::from(policy.limit) - count - 1) as u32,
            reset_after_secs: policy.window_secs,
        })
    }

    async fn atomic(&self, key: &str, policy: &RateLimitPolicy) -> Result<Decision, StoreError> {
        let count = self.store.incr(key, policy.window_secs).await?;

        if count > u64::from(policy.limit) {
            return Ok(Decision::Denied {
                limit: policy.limit,
                retry_after_secs: policy.window_secs,
            });
        }

        Ok(Decision::Allowed {
            limit: policy.limit,
            remaining: (u64::from(policy.limit) - count) as u32,
            reset_after_secs: policy.window_secs,
        })
    }
}

fn parse_count(key: &str, bytes: &[u8]) -> u64 {
    match std::str::from_utf8(bytes).ok().and_then(|s| s.trim().parse().ok()) {
        Some(count) => count,
        None => {
            tracing::warn!("Unreadable rate limit counter at {}, restarting count", key);
            0
        }
    }
}

/// 身份取自 IP，还是优先取已认证用户
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityScope {
    Ip,
    User,
}

/// 路由层使用的限流守卫
#[derive(Clone)]
pub struct RateLimitGuard {
    limiter: Arc<RateLimiter>,
    policy: RateLimitPolicy,
    scope: IdentityScope,
}

impl RateLimitGuard {
    pub fn per_ip(limiter: Arc<RateLimiter>, policy: RateLimitPolicy) -> Self {
        Self {
            limiter,
            policy,
            scope: IdentityScope::Ip,
        }
    }

    pub fn per_user(limiter: Arc<RateLimiter>, policy: RateLimitPolicy) -> Self {
        Self {
            limiter,
            policy,
            scope: IdentityScope::User,
        }
    }

    fn identity(&self, req: &Request<Body>) -> Identity {
        if self.scope == IdentityScope::Ip {
            return Identity::Ip(client_ip(req));
        }

        if let Some(claims) = req.extensions().get::<Claims>() {
            return Identity::User(claims.sub.clone());
        }
        let fallback = match req
            .headers()
            .get("x-api-key")
            .and_then(|h| h.to_str().ok())
            .filter(|k| !k.trim().is_empty())
        {
            Some(key) => Identity::api_key(key.trim()),
            None => Identity::Ip(client_ip(req)),
        };
        fallback.tagged()
    }
}

/// 客户端 IP：x-real-ip，其次 x-forwarded-for 第一个非空项，再次连接地址
pub fn client_ip(req: &Request<Body>) -> String {
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    req.headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.trim().is_empty())
        .or_else(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .or(remote_ip.as_deref())
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

fn route_key(req: &Request<Body>) -> String {
    req.extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitExceeded {
    error: &'static str,
    message: String,
    retry_after: u64,
}

fn set_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset_after_secs: u64) {
    let reset_at = chrono::Utc::now().timestamp() + reset_after_secs as i64;
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_at));
}

pub async fn rate_limit(
    State(guard): State<RateLimitGuard>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let identity = guard.identity(&req);
    let route = route_key(&req);

    match guard.limiter.check(&identity, &route, &guard.policy).await {
        Decision::Allowed {
            limit,
            remaining,
            reset_after_secs,
        } => {
            let mut response = next.run(req).await;
            // 内层守卫已写入的限流头更具体，外层不覆盖
            if !response.headers().contains_key(X_RATELIMIT_LIMIT) {
                set_limit_headers(response.headers_mut(), limit, remaining, reset_after_secs);
            }
            response
        }
        Decision::Denied {
            limit,
            retry_after_secs,
        } => {
            tracing::info!(
                "Rate limit exceeded: {}:{}:{}",
                guard.policy.key_prefix,
                identity.as_str(),
                route
            );
            let body = RateLimitExceeded {
                error: "Too Many Requests",
                message: format!("请求过于频繁，请在{}秒后重试", retry_after_secs),
                retry_after: retry_after_secs,
            };
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            let headers = response.headers_mut();
            set_limit_headers(headers, limit, 0, retry_after_secs);
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 脚本化的故障存储，记录调用次数
    #[derive(Default)]
    struct FailingStore {
        fail_get: bool,
        fail_put: bool,
        gets: AtomicUsize,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl KvStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail_get {
                return Err(StoreError::Backend("get exploded".into()));
            }
            Ok(None)
        }

        async fn put(&self, _: &str, _: Vec<u8>, _: PutOptions) -> Result<(), StoreError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            if self.fail_put {
                return Err(StoreError::Backend("put exploded".into()));
            }
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn ip(addr: &str) -> Identity {
        Identity::Ip(addr.to_string())
    }

    #[tokio::test]
    async fn test_third_request_denied_in_window() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::new(Arc::new(store.clone()));
        let policy = RateLimitPolicy::new(2, 60, "strict");
        let who = ip("1.2.3.4");

        let results = [
            limiter.check(&who, "/signin", &policy).await,
            limiter.check(&who, "/signin", &policy).await,
            limiter.check(&who, "/signin", &policy).await,
        ];

        assert!(matches!(results[0], Decision::Allowed { remaining: 1, .. }));
        assert!(matches!(results[1], Decision::Allowed { remaining: 0, .. }));
        assert_eq!(
            results[2],
            Decision::Denied {
                limit: 2,
                retry_after_secs: 60
            }
        );
        assert_eq!(
            store.get("strict:1.2.3.4:/signin").await.unwrap(),
            Some(b"2".to_vec())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_fixed_not_sliding() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::new(Arc::new(store.clone()));
        let policy = RateLimitPolicy::new(3, 60, "default");
        let who = ip("9.9.9.9");

        assert!(limiter.check(&who, "/forms", &policy).await.is_allowed());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.check(&who, "/forms", &policy).await.is_allowed());
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(limiter.check(&who, "/forms", &policy).await.is_allowed());
        assert!(!limiter.check(&who, "/forms", &policy).await.is_allowed());

        // 后续请求没有延长窗口，第一次请求 60 秒后计数整体过期
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(
            limiter.check(&who, "/forms", &policy).await,
            Decision::Allowed { remaining: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_remaining_decreases_by_one() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let policy = RateLimitPolicy::new(5, 60, "default");
        let who = ip("5.5.5.5");

        for expected in (0..5).rev() {
            match limiter.check(&who, "/forms", &policy).await {
                Decision::Allowed { remaining, .. } => assert_eq!(remaining, expected),
                other => panic!("expected Allowed, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let policy = RateLimitPolicy::new(1, 60, "default");

        assert!(limiter.check(&ip("a"), "/x", &policy).await.is_allowed());
        assert!(limiter.check(&ip("a"), "/y", &policy).await.is_allowed());
        assert!(limiter.check(&ip("b"), "/x", &policy).await.is_allowed());
        assert!(!limiter.check(&ip("a"), "/x", &policy).await.is_allowed());

        let strict = RateLimitPolicy::new(1, 60, "strict");
        assert!(limiter.check(&ip("a"), "/x", &strict).await.is_allowed());
    }

    #[tokio::test]
    async fn test_get_failure_fails_open() {
        let store = Arc::new(FailingStore {
            fail_get: true,
            ..Default::default()
        });
        let limiter = RateLimiter::new(store.clone());
        let policy = RateLimitPolicy::new(60, 60, "default");
        let who = ip("5.6.7.8");

        assert!(limiter.try_check(&who, "/forms", &policy).await.is_err());
        let decision = limiter.check(&who, "/forms", &policy).await;
        assert!(decision.is_allowed());
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_put_failure_fails_open() {
        let store = Arc::new(FailingStore {
            fail_put: true,
            ..Default::default()
        });
        let limiter = RateLimiter::new(store.clone());
        let policy = RateLimitPolicy::new(1, 60, "default");

        for _ in 0..3 {
            assert!(limiter.check(&ip("x"), "/forms", &policy).await.is_allowed());
        }
        // 每次检查恰好一读一写
        assert_eq!(store.gets.load(Ordering::SeqCst), 3);
        assert_eq!(store.puts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_denied_request_does_not_write() {
        let store = MemoryStore::new();
        store
            .put("default:x:/forms", b"1".to_vec(), PutOptions::expire_in(60))
            .await
            .unwrap();
        let limiter = RateLimiter::new(Arc::new(store.clone()));
        let policy = RateLimitPolicy::new(1, 60, "default");

        assert!(!limiter.check(&ip("x"), "/forms", &policy).await.is_allowed());
        assert_eq!(store.get("default:x:/forms").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_unreadable_counter_restarts() {
        let store = MemoryStore::new();
        store
            .put("default:x:/forms", b"garbage".to_vec(), PutOptions::expire_in(60))
            .await
            .unwrap();
        let limiter = RateLimiter::new(Arc::new(store));
        let policy = RateLimitPolicy::new(3, 60, "default");

        assert!(matches!(
            limiter.check(&ip("x"), "/forms", &policy).await,
            Decision::Allowed { remaining: 2, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_atomic_mode_counts_denied_attempts() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::with_mode(Arc::new(store.clone()), CounterMode::AtomicIncrement);
        let policy = RateLimitPolicy::new(2, 60, "user");
        let who = Identity::User("u-1".into());

        assert!(matches!(
            limiter.check(&who, "/submit", &policy).await,
            Decision::Allowed { remaining: 1, .. }
        ));
        assert!(matches!(
            limiter.check(&who, "/submit", &policy).await,
            Decision::Allowed { remaining: 0, .. }
        ));
        assert!(!limiter.check(&who, "/submit", &policy).await.is_allowed());
        assert_eq!(store.get("user:u-1:/submit").await.unwrap(), Some(b"3".to_vec()));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.check(&who, "/submit", &policy).await.is_allowed());
    }

    #[tokio::test]
    async fn test_atomic_mode_without_support_fails_open() {
        let limiter = RateLimiter::with_mode(
            Arc::new(FailingStore::default()),
            CounterMode::AtomicIncrement,
        );
        let policy = RateLimitPolicy::new(1, 60, "default");
        assert!(matches!(
            limiter.try_check(&ip("x"), "/", &policy).await,
            Err(StoreError::Unsupported(_))
        ));
        assert!(limiter.check(&ip("x"), "/", &policy).await.is_allowed());
    }

    #[test]
    fn test_api_key_identity_is_hashed() {
        let identity = Identity::api_key("sk_live_secret");
        assert!(!identity.as_str().contains("secret"));
        assert_eq!(identity.as_str().len(), 32);
        assert_eq!(identity, Identity::api_key("sk_live_secret"));
    }

    #[test]
    fn test_user_scope_tags_fallback_identities() {
        let guard = RateLimitGuard::per_user(
            Arc::new(RateLimiter::new(Arc::new(MemoryStore::new()))),
            RateLimitPolicy::per_user(10),
        );

        let anonymous = Request::builder()
            .header("x-real-ip", "1.2.3.4")
            .body(Body::empty())
            .unwrap();
        assert_eq!(guard.identity(&anonymous), Identity::Ip("ip:1.2.3.4".into()));

        let keyed = Request::builder()
            .header("x-api-key", "sk_live_secret")
            .body(Body::empty())
            .unwrap();
        let expected = format!("apiKey:{}", Identity::api_key("sk_live_secret").as_str());
        assert_eq!(guard.identity(&keyed).as_str(), expected);

        let mut signed_in = Request::builder()
            .header("x-real-ip", "1.2.3.4")
            .body(Body::empty())
            .unwrap();
        signed_in.extensions_mut().insert(Claims {
            sub: "1.2.3.4".into(),
            exp: 0,
            iat: 0,
        });
        assert_eq!(guard.identity(&signed_in), Identity::User("1.2.3.4".into()));

        // 按 IP 计数时不加标记
        let per_ip = RateLimitGuard::per_ip(
            Arc::new(RateLimiter::new(Arc::new(MemoryStore::new()))),
            RateLimitPolicy::default_policy(),
        );
        assert_eq!(per_ip.identity(&anonymous), Identity::Ip("1.2.3.4".into()));
    }

    #[tokio::test]
    async fn test_user_id_shaped_like_ip_has_own_counter() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::new(Arc::new(store.clone()));
        let policy = RateLimitPolicy::per_user(1);

        let user = Identity::User("1.2.3.4".into());
        let anonymous = Identity::Ip("1.2.3.4".into()).tagged();
        assert!(limiter.check(&user, "/submit", &policy).await.is_allowed());
        assert!(limiter.check(&anonymous, "/submit", &policy).await.is_allowed());

        assert!(store.get("user:1.2.3.4:/submit").await.unwrap().is_some());
        assert!(store.get("user:ip:1.2.3.4:/submit").await.unwrap().is_some());
    }

    #[test]
    fn test_client_ip_prefers_proxy_headers() {
        let req = Request::builder()
            .header("x-forwarded-for", " , 10.0.0.1, 10.0.0.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "10.0.0.1");

        let req = Request::builder()
            .header("x-real-ip", "192.168.1.9")
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "192.168.1.9");

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req), "unknown");
    }
}
