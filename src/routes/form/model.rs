use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormStatus {
    Draft,
    Published,
    Closed,
}

impl TryFrom<String> for FormStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "draft" => Ok(FormStatus::Draft),
            "published" => Ok(FormStatus::Published),
            "closed" => Ok(FormStatus::Closed),
            other => Err(format!("unknown form status: {}", other)),
        }
    }
}

/// 表单持久化记录，数据库是唯一可信来源
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FormRecord {
    pub id: Uuid,
    pub public_id: String,
    pub owner_id: String,
    pub title: String,
    pub schema: Value,
    pub settings: Value,
    pub require_auth: bool,
    #[sqlx(try_from = "String")]
    pub status: FormStatus,
    pub submission_count: i32,
    pub max_submissions: Option<i32>,
    pub closes_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FormRecord {
    /// 已发布、未过截止时间、未达到提交上限
    pub fn is_publicly_available(&self, now: DateTime<Utc>) -> bool {
        self.status == FormStatus::Published
            && accepting(now, self.closes_at, self.submission_count, self.max_submissions)
    }
}

fn accepting(
    now: DateTime<Utc>,
    closes_at: Option<DateTime<Utc>>,
    submission_count: i32,
    max_submissions: Option<i32>,
) -> bool {
    closes_at.is_none_or(|at| now < at) && max_submissions.is_none_or(|max| submission_count < max)
}

/// 提交前从数据库实时读取的表单状态，不经过缓存
#[derive(Debug, Clone, FromRow)]
pub struct SubmissionGate {
    pub form_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: FormStatus,
    pub require_auth: bool,
    pub submission_count: i32,
    pub max_submissions: Option<i32>,
    pub closes_at: Option<DateTime<Utc>>,
}

impl SubmissionGate {
    pub fn is_accepting(&self, now: DateTime<Utc>) -> bool {
        self.status == FormStatus::Published
            && accepting(now, self.closes_at, self.submission_count, self.max_submissions)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Uuid,
    pub form_id: Uuid,
    pub submitter_id: Option<String>,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFormRequest {
    pub title: Option<String>,
    pub schema: Option<Value>,
    pub settings: Option<Value>,
    pub require_auth: Option<bool>,
    pub max_submissions: Option<i32>,
    pub closes_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubmissionRequest {
    pub data: Value,
}

/// 表单管理接口返回的信息（包含所有者可见的字段）
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormInfo {
    pub id: Uuid,
    pub public_id: String,
    pub title: String,
    pub status: FormStatus,
    pub require_auth: bool,
    pub submission_count: i32,
    pub updated_at: DateTime<Utc>,
}

impl From<FormRecord> for FormInfo {
    fn from(form: FormRecord) -> Self {
        Self {
            id: form.id,
            public_id: form.public_id,
            title: form.title,
            status: form.status,
            require_auth: form.require_auth,
            submission_count: form.submission_count,
            updated_at: form.updated_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// 表单数据访问
/// 带 owner_id 的操作只作用于该用户拥有的表单，不匹配时返回 None
#[async_trait]
pub trait FormRepository: Send + Sync {
    async fn find_public(&self, public_id: &str) -> Result<Option<FormRecord>, RepositoryError>;

    async fn find_owned(
        &self,
        id: Uuid,
        owner_id: &str,
    ) -> Result<Option<FormRecord>, RepositoryError>;

    async fn publish(&self, id: Uuid, owner_id: &str)
    -> Result<Option<FormRecord>, RepositoryError>;

    async fn unpublish(
        &self,
        id: Uuid,
        owner_id: &str,
    ) -> Result<Option<FormRecord>, RepositoryError>;

    async fn update(
        &self,
        id: Uuid,
        owner_id: &str,
        changes: UpdateFormRequest,
    ) -> Result<Option<FormRecord>, RepositoryError>;

    async fn submission_gate(
        &self,
        public_id: &str,
    ) -> Result<Option<SubmissionGate>, RepositoryError>;

    /// 提交数已达上限时返回 None
    async fn create_submission(
        &self,
        form_id: Uuid,
        submitter_id: Option<&str>,
        data: Value,
    ) -> Result<Option<Submission>, RepositoryError>;
}
