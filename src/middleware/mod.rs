mod auth;
mod error_handler;
mod rate_limit;

pub use auth::{MaybeClaims, auth_middleware, optional_auth};
pub use error_handler::log_errors;
pub use rate_limit::{
    CounterMode, Decision, Identity, IdentityScope, RateLimitGuard, RateLimitPolicy, RateLimiter,
    X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET, client_ip, rate_limit,
};
