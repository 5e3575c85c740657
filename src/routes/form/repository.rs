use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::model::{
    FormRecord, FormRepository, RepositoryError, Submission, SubmissionGate, UpdateFormRequest,
};

const FORM_COLUMNS: &str = r#"
    id, public_id, owner_id, title, schema, settings, require_auth, status,
    submission_count, max_submissions, closes_at, created_at, updated_at
"#;

/// Postgres 表单仓库
#[derive(Clone)]
pub struct PgFormRepository {
    pool: PgPool,
}

impl PgFormRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn set_status(
        &self,
        id: Uuid,
        owner_id: &str,
        status: &str,
    ) -> Result<Option<FormRecord>, RepositoryError> {
        let sql = format!(
            r#"
            UPDATE forms SET status = $3, updated_at = NOW()
            WHERE id = $1 AND owner_id = $2
            RETURNING {FORM_COLUMNS}
            "#
        );
        let form = sqlx::query_as::<_, FormRecord>(&sql)
            .bind(id)
            .bind(owner_id)
            .bind(status)
            .fetch_optional(&self.pool)
            .await?;
        Ok(form)
    }
}

#[async_trait]
impl FormRepository for PgFormRepository {
    async fn find_public(&self, public_id: &str) -> Result<Option<FormRecord>, RepositoryError> {
        let sql = format!(
            r#"
            SELECT {FORM_COLUMNS}
            FROM forms
            WHERE public_id = $1
              AND status = 'published'
              AND (closes_at IS NULL OR closes_at > NOW())
              AND (max_submissions IS NULL OR submission_count < max_submissions)
            "#
        );
        let form = sqlx::query_as::<_, FormRecord>(&sql)
            .bind(public_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(form)
    }

    async fn find_owned(
        &self,
        id: Uuid,
        owner_id: &str,
    ) -> Result<Option<FormRecord>, RepositoryError> {
        let sql = format!("SELECT {FORM_COLUMNS} FROM forms WHERE id = $1 AND owner_id = $2");
        let form = sqlx::query_as::<_, FormRecord>(&sql)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(form)
    }

    async fn publish(
        &self,
        id: Uuid,
        owner_id: &str,
    ) -> Result<Option<FormRecord>, RepositoryError> {
        self.set_status(id, owner_id, "published").await
    }

    async fn unpublish(
        &self,
        id: Uuid,
        owner_id: &str,
    ) -> Result<Option<FormRecord>, RepositoryError> {
        self.set_status(id, owner_id, "draft").await
    }

    async fn update(
        &self,
        id: Uuid,
        owner_id: &str,
        changes: UpdateFormRequest,
    ) -> Result<Option<FormRecord>, RepositoryError> {
        let sql = format!(
            r#"
            UPDATE forms SET
                title = COALESCE($3, title),
                schema = COALESCE($4, schema),
                settings = COALESCE($5, settings),
                require_auth = COALESCE($6, require_auth),
                max_submissions = COALESCE($7, max_submissions),
                closes_at = COALESCE($8, closes_at),
                updated_at = NOW()
            WHERE id = $1 AND owner_id = $2
            RETURNING {FORM_COLUMNS}
            "#
        );
        let form = sqlx::query_as::<_, FormRecord>(&sql)
            .bind(id)
            .bind(owner_id)
            .bind(changes.title)
            .bind(changes.schema)
            .bind(changes.settings)
            .bind(changes.require_auth)
            .bind(changes.max_submissions)
            .bind(changes.closes_at)
            .fetch_optional(&self.pool)
            .await?;
        Ok(form)
    }

    async fn submission_gate(
        &self,
        public_id: &str,
    ) -> Result<Option<SubmissionGate>, RepositoryError> {
        let gate = sqlx::query_as::<_, SubmissionGate>(
            r#"
            SELECT id AS form_id, status, require_auth, submission_count, max_submissions, closes_at
            FROM forms
            WHERE public_id = $1
            "#,
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(gate)
    }

    async fn create_submission(
        &self,
        form_id: Uuid,
        submitter_id: Option<&str>,
        data: Value,
    ) -> Result<Option<Submission>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // 条件自增，防止并发提交超过上限
        let reserved = sqlx::query(
            r#"
            UPDATE forms SET submission_count = submission_count + 1
            WHERE id = $1
              AND (max_submissions IS NULL OR submission_count < max_submissions)
            "#,
        )
        .bind(form_id)
        .execute(&mut *tx)
        .await?;

        if reserved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let submission = sqlx::query_as::<_, Submission>(
            r#"
            INSERT INTO submissions (id, form_id, submitter_id, data, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, form_id, submitter_id, data, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(form_id)
        .bind(submitter_id)
        .bind(data)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(submission))
    }
}
