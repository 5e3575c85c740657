use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use crate::{
    AppState,
    error::AppError,
    utils::{Claims, verify_token},
};

async fn bearer_claims(parts: &mut Parts, state: &AppState) -> Option<Claims> {
    let TypedHeader(Authorization(bearer)) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .ok()?;

    match verify_token(bearer.token(), &state.config) {
        Ok(claims) => Some(claims),
        Err(e) => {
            tracing::debug!("Rejected bearer token: {}", e);
            None
        }
    }
}

/// 必须携带有效令牌，校验通过后把 Claims 放入请求扩展
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = req.into_parts();
    let claims = bearer_claims(&mut parts, &state)
        .await
        .ok_or(AppError::Unauthorized)?;

    parts.extensions.insert(claims);
    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// 有有效令牌就附加 Claims，没有也放行
pub async fn optional_auth(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let (mut parts, body) = req.into_parts();
    if let Some(claims) = bearer_claims(&mut parts, &state).await {
        parts.extensions.insert(claims);
    }
    next.run(Request::from_parts(parts, body)).await
}

/// 读取可选认证中间件附加的 Claims
#[derive(Debug, Clone)]
pub struct MaybeClaims(pub Option<Claims>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeClaims {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeClaims(parts.extensions.get::<Claims>().cloned()))
    }
}
