use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{error, info};

// 日志中最多记录的响应体字节数
const MAX_LOGGED_BODY: usize = 1024;

/// 记录服务端错误和限流拒绝
pub async fn log_errors(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        info!("Request throttled - {} {}", method, path);
        return response;
    }
    if !status.is_server_error() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to read error response body for {} {}: {}", method, path, e);
            return Response::from_parts(parts, Body::empty());
        }
    };
    let shown = &bytes[..bytes.len().min(MAX_LOGGED_BODY)];

    error!(
        "Server error - {} {} - Status: {}, Body: {}",
        method,
        path,
        status,
        String::from_utf8_lossy(shown)
    );

    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(bytes))
}
