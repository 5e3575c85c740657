use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::routes::form::RepositoryError;
use crate::utils::{error_codes, error_to_api_response};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("未授权访问")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("表单已停止接收提交")]
    FormClosed,
    #[error("{0}")]
    Validation(String),
    #[error("内部服务器错误")]
    Repository(#[from] RepositoryError),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, i32) {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND),
            AppError::FormClosed => (StatusCode::FORBIDDEN, error_codes::FORM_CLOSED),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR),
            AppError::Repository(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Repository(e) = &self {
            tracing::error!("Repository error: {}", e);
        }

        let (status, code) = self.status_and_code();
        (status, error_to_api_response::<()>(code, self.to_string())).into_response()
    }
}
