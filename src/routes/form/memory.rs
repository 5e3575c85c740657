use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{
    FormRecord, FormRepository, FormStatus, RepositoryError, Submission, SubmissionGate,
    UpdateFormRequest,
};

/// 进程内表单仓库，供测试替代 Postgres
#[derive(Clone, Default)]
pub struct MemoryFormRepository {
    forms: Arc<RwLock<HashMap<Uuid, FormRecord>>>,
    submissions: Arc<RwLock<Vec<Submission>>>,
}

impl MemoryFormRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, form: FormRecord) {
        self.forms.write().await.insert(form.id, form);
    }

    pub async fn get(&self, id: Uuid) -> Option<FormRecord> {
        self.forms.read().await.get(&id).cloned()
    }

    pub async fn submissions(&self, form_id: Uuid) -> Vec<Submission> {
        self.submissions
            .read()
            .await
            .iter()
            .filter(|s| s.form_id == form_id)
            .cloned()
            .collect()
    }

    async fn modify_owned(
        &self,
        id: Uuid,
        owner_id: &str,
        apply: impl FnOnce(&mut FormRecord),
    ) -> Option<FormRecord> {
        let mut forms = self.forms.write().await;
        let form = forms.get_mut(&id).filter(|f| f.owner_id == owner_id)?;
        apply(form);
        form.updated_at = Utc::now();
        Some(form.clone())
    }
}

#[async_trait]
impl FormRepository for MemoryFormRepository {
    async fn find_public(&self, public_id: &str) -> Result<Option<FormRecord>, RepositoryError> {
        let now = Utc::now();
        let forms = self.forms.read().await;
        Ok(forms
            .values()
            .find(|f| f.public_id == public_id && f.is_publicly_available(now))
            .cloned())
    }

    async fn find_owned(
        &self,
        id: Uuid,
        owner_id: &str,
    ) -> Result<Option<FormRecord>, RepositoryError> {
        let forms = self.forms.read().await;
        Ok(forms.get(&id).filter(|f| f.owner_id == owner_id).cloned())
    }

    async fn publish(
        &self,
        id: Uuid,
        owner_id: &str,
    ) -> Result<Option<FormRecord>, RepositoryError> {
        Ok(self
            .modify_owned(id, owner_id, |f| f.status = FormStatus::Published)
            .await)
    }

    async fn unpublish(
        &self,
        id: Uuid,
        owner_id: &str,
    ) -> Result<Option<FormRecord>, RepositoryError> {
        Ok(self
            .modify_owned(id, owner_id, |f| f.status = FormStatus::Draft)
            .await)
    }

    async fn update(
        &self,
        id: Uuid,
        owner_id: &str,
        changes: UpdateFormRequest,
    ) -> Result<Option<FormRecord>, RepositoryError> {
        Ok(self
            .modify_owned(id, owner_id, |f| {
                if let Some(title) = changes.title {
                    f.title = title;
                }
                if let Some(schema) = changes.schema {
                    f.schema = schema;
                }
                if let Some(settings) = changes.settings {
                    f.settings = settings;
                }
                if let Some(require_auth) = changes.require_auth {
                    f.require_auth = require_auth;
                }
                if changes.max_submissions.is_some() {
                    f.max_submissions = changes.max_submissions;
                }
                if changes.closes_at.is_some() {
                    f.closes_at = changes.closes_at;
                }
            })
            .await)
    }

    async fn submission_gate(
        &self,
        public_id: &str,
    ) -> Result<Option<SubmissionGate>, RepositoryError> {
        let forms = self.forms.read().await;
        Ok(forms
            .values()
            .find(|f| f.public_id == public_id)
            .map(|f| SubmissionGate {
                form_id: f.id,
                status: f.status,
                require_auth: f.require_auth,
                submission_count: f.submission_count,
                max_submissions: f.max_submissions,
                closes_at: f.closes_at,
            }))
    }

    async fn create_submission(
        &self,
        form_id: Uuid,
        submitter_id: Option<&str>,
        data: Value,
    ) -> Result<Option<Submission>, RepositoryError> {
        let mut forms = self.forms.write().await;
        let form = match forms.get_mut(&form_id) {
            Some(form) => form,
            None => return Ok(None),
        };
        if form
            .max_submissions
            .is_some_and(|max| form.submission_count >= max)
        {
            return Ok(None);
        }
        form.submission_count += 1;

        let submission = Submission {
            id: Uuid::new_v4(),
            form_id,
            submitter_id: submitter_id.map(str::to_string),
            data,
            created_at: Utc::now(),
        };
        self.submissions.write().await.push(submission.clone());
        Ok(Some(submission))
    }
}
