use axum::{
    Extension,
    extract::{Json, Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    AppState,
    cache::CachedFormPayload,
    common::ApiResponse,
    error::AppError,
    middleware::MaybeClaims,
    utils::{Claims, success_to_api_response},
};

use super::model::{
    CreateSubmissionRequest, FormInfo, FormRecord, FormStatus, UpdateFormRequest,
};

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub id: Uuid,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheCleared {
    pub public_id: String,
    pub cleared: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckTokenResponse {
    pub user_id: String,
    pub expires_at: i64,
}

fn form_not_found() -> AppError {
    AppError::NotFound("表单不存在".to_string())
}

fn owned_form(form: Option<FormRecord>) -> Result<FormRecord, AppError> {
    form.ok_or_else(form_not_found)
}

/// 公开读取表单：先查缓存，未命中时查数据库并回填缓存
#[axum::debug_handler]
pub async fn get_public_form(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
) -> ApiResult<CachedFormPayload> {
    if let Some(payload) = state.form_cache.get(&public_id).await {
        return Ok(success_to_api_response(payload));
    }

    let form = state
        .forms
        .find_public(&public_id)
        .await?
        .ok_or_else(form_not_found)?;

    let payload = CachedFormPayload::from(&form);
    state.form_cache.set_default_ttl(&public_id, &payload).await;

    Ok(success_to_api_response(payload))
}

/// 发布后立即用最新版本预热缓存
#[axum::debug_handler]
pub async fn publish_form(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<FormInfo> {
    let form = owned_form(state.forms.publish(id, &claims.sub).await?)?;
    tracing::info!("Form {} published by {}", form.id, claims.sub);

    state
        .form_cache
        .set_default_ttl(&form.public_id, &CachedFormPayload::from(&form))
        .await;

    Ok(success_to_api_response(FormInfo::from(form)))
}

#[axum::debug_handler]
pub async fn unpublish_form(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<FormInfo> {
    let form = owned_form(state.forms.unpublish(id, &claims.sub).await?)?;
    tracing::info!("Form {} unpublished by {}", form.id, claims.sub);

    state.form_cache.invalidate(&form.public_id).await;

    Ok(success_to_api_response(FormInfo::from(form)))
}

/// 编辑表单不触碰缓存，公开页面在过期或重新发布前继续返回旧版本
#[axum::debug_handler]
pub async fn update_form(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateFormRequest>,
) -> ApiResult<FormInfo> {
    if req.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(AppError::Validation("表单标题不能为空".to_string()));
    }
    if req.max_submissions.is_some_and(|max| max < 0) {
        return Err(AppError::Validation("提交上限不能为负数".to_string()));
    }

    let form = owned_form(state.forms.update(id, &claims.sub, req).await?)?;
    Ok(success_to_api_response(FormInfo::from(form)))
}

#[axum::debug_handler]
pub async fn clear_form_cache(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<CacheCleared> {
    let form = owned_form(state.forms.find_owned(id, &claims.sub).await?)?;

    state.form_cache.invalidate(&form.public_id).await;
    tracing::info!("Form cache cleared for {} by {}", form.public_id, claims.sub);

    Ok(success_to_api_response(CacheCleared {
        public_id: form.public_id,
        cleared: true,
    }))
}

/// 提交前实时读取状态和提交数，不使用缓存
#[axum::debug_handler]
pub async fn submit_form(
    State(state): State<AppState>,
    MaybeClaims(claims): MaybeClaims,
    Path(public_id): Path<String>,
    Json(req): Json<CreateSubmissionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SubmissionReceipt>>), AppError> {
    let gate = state
        .forms
        .submission_gate(&public_id)
        .await?
        .ok_or_else(form_not_found)?;

    if gate.status == FormStatus::Draft {
        return Err(form_not_found());
    }
    if !gate.is_accepting(Utc::now()) {
        return Err(AppError::FormClosed);
    }
    if gate.require_auth && claims.is_none() {
        return Err(AppError::Unauthorized);
    }
    if !req.data.is_object() {
        return Err(AppError::Validation("提交内容必须是对象".to_string()));
    }

    let submitter = claims.as_ref().map(|c| c.sub.as_str());
    let submission = state
        .forms
        .create_submission(gate.form_id, submitter, req.data)
        .await?
        .ok_or(AppError::FormClosed)?;

    Ok((
        StatusCode::CREATED,
        success_to_api_response(SubmissionReceipt {
            id: submission.id,
            created_at: submission.created_at,
        }),
    ))
}

#[axum::debug_handler]
pub async fn check_token(Extension(claims): Extension<Claims>) -> ApiResult<CheckTokenResponse> {
    Ok(success_to_api_response(CheckTokenResponse {
        user_id: claims.sub,
        expires_at: claims.exp,
    }))
}
