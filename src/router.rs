use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
};

use crate::{
    AppState,
    middleware::{RateLimitGuard, auth_middleware, log_errors, optional_auth, rate_limit},
    routes::form,
};

// 公开路由：读取表单不需要认证，提交表单按用户（或IP）限流
fn public_routes(state: &AppState, user_guard: RateLimitGuard) -> Router<AppState> {
    Router::new()
        .route("/public/forms/{public_id}", get(form::get_public_form))
        .route(
            "/public/forms/{public_id}/submissions",
            post(form::submit_form)
                .layer(from_fn_with_state(user_guard, rate_limit))
                .layer(from_fn_with_state(state.clone(), optional_auth)),
        )
}

// 表单管理路由：需要认证，按用户限流
fn protected_routes(state: &AppState, user_guard: RateLimitGuard) -> Router<AppState> {
    Router::new()
        .route("/forms/{id}", put(form::update_form))
        .route("/forms/{id}/publish", post(form::publish_form))
        .route("/forms/{id}/unpublish", post(form::unpublish_form))
        .route("/forms/{id}/cache", delete(form::clear_form_cache))
        .layer(from_fn_with_state(user_guard, rate_limit))
        .layer(from_fn_with_state(state.clone(), auth_middleware))
}

// 凭证相关路由：严格限流，认证失败的尝试同样计数
fn auth_routes(state: &AppState, strict_guard: RateLimitGuard) -> Router<AppState> {
    Router::new().route(
        "/auth/check-token",
        get(form::check_token)
            .layer(from_fn_with_state(state.clone(), auth_middleware))
            .layer(from_fn_with_state(strict_guard, rate_limit)),
    )
}

pub fn build_router(state: AppState) -> Router {
    let limiter = state.rate_limiter.clone();
    let default_guard = RateLimitGuard::per_ip(limiter.clone(), state.config.default_rate_limit());
    let strict_guard = RateLimitGuard::per_ip(limiter.clone(), state.config.strict_rate_limit());
    let user_guard = RateLimitGuard::per_user(limiter, state.config.user_rate_limit());

    let api = Router::new()
        .merge(public_routes(&state, user_guard.clone()))
        .merge(protected_routes(&state, user_guard))
        .merge(auth_routes(&state, strict_guard));

    let base = state.config.api_base_uri.trim_end_matches('/');
    let router = if base.is_empty() {
        api
    } else {
        Router::new().nest(base, api)
    };

    // 限流在内层，日志在外层，这样被拒绝的请求也会被记录
    router
        .layer(from_fn_with_state(default_guard, rate_limit))
        .layer(from_fn(log_errors))
        .with_state(state)
}
