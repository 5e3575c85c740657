use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::middleware::{CounterMode, RateLimitPolicy};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub strict_rate_limit_window_secs: u64,
    pub strict_rate_limit_requests: u32,
    pub user_rate_limit_window_secs: u64,
    pub user_rate_limit_requests: u32,
    pub rate_limit_atomic: bool,
    pub form_cache_ttl_secs: u64,
    pub store_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/forms".into(),
            redis_url: "redis://127.0.0.1/".into(),
            jwt_secret: "dev-secret".into(),
            server_host: "::".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
            rate_limit_window_secs: 60,
            rate_limit_requests: 60,
            strict_rate_limit_window_secs: 300,
            strict_rate_limit_requests: 5,
            user_rate_limit_window_secs: 3600,
            user_rate_limit_requests: 100,
            rate_limit_atomic: false,
            form_cache_ttl_secs: 3600,
            store_timeout_ms: 250,
        }
    }
}

// 可选配置项，缺失或格式错误时使用默认值
fn var_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}, using default", name);
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            server_host: var_or("SERVER_HOST", defaults.server_host),
            server_port: var_or("SERVER_PORT", defaults.server_port),
            api_base_uri: var_or("API_BASE_URI", defaults.api_base_uri),
            rate_limit_window_secs: var_or("RATE_LIMIT_WINDOW", defaults.rate_limit_window_secs),
            rate_limit_requests: var_or("RATE_LIMIT_REQUESTS", defaults.rate_limit_requests),
            strict_rate_limit_window_secs: var_or(
                "STRICT_RATE_LIMIT_WINDOW",
                defaults.strict_rate_limit_window_secs,
            ),
            strict_rate_limit_requests: var_or(
                "STRICT_RATE_LIMIT_REQUESTS",
                defaults.strict_rate_limit_requests,
            ),
            user_rate_limit_window_secs: var_or(
                "USER_RATE_LIMIT_WINDOW",
                defaults.user_rate_limit_window_secs,
            ),
            user_rate_limit_requests: var_or(
                "USER_RATE_LIMIT_REQUESTS",
                defaults.user_rate_limit_requests,
            ),
            rate_limit_atomic: var_or("RATE_LIMIT_ATOMIC", defaults.rate_limit_atomic),
            form_cache_ttl_secs: var_or("FORM_CACHE_TTL", defaults.form_cache_ttl_secs),
            store_timeout_ms: var_or("STORE_TIMEOUT_MS", defaults.store_timeout_ms),
        })
    }

    pub fn default_rate_limit(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.rate_limit_requests, self.rate_limit_window_secs, "default")
    }

    pub fn strict_rate_limit(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(
            self.strict_rate_limit_requests,
            self.strict_rate_limit_window_secs,
            "strict",
        )
    }

    pub fn user_rate_limit(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(
            self.user_rate_limit_requests,
            self.user_rate_limit_window_secs,
            "user",
        )
    }

    pub fn counter_mode(&self) -> CounterMode {
        if self.rate_limit_atomic {
            CounterMode::AtomicIncrement
        } else {
            CounterMode::ReadWrite
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
