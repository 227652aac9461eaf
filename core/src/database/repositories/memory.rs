// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! In-memory repository fakes with Postgres-equivalent semantics.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    decode_cursor, encode_cursor, new_job_id, CancelOutcome, CredentialRepository, JobListFilter,
    JobPage, JobRepository, NewJob, TenantRepository,
};
use crate::credentials::Credential;
use crate::database::error::{DatabaseError, DatabaseResult};
use crate::database::models::Tenant;
use crate::jobs::{Job, JobStatus};

/// In-memory job repository.
#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryJobRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Whether the repository is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn create(&self, new_job: NewJob) -> DatabaseResult<Job> {
        let mut jobs = self.jobs.lock();

        if let Some(key) = &new_job.idempotency_key {
            if let Some(existing) = jobs
                .iter()
                .find(|j| j.tenant_id == new_job.tenant_id && j.idempotency_key.as_ref() == Some(key))
            {
                return Ok(existing.clone());
            }
        }

        let now = Utc::now();
        let job = Job {
            id: new_job_id(),
            tenant_id: new_job.tenant_id,
            idempotency_key: new_job.idempotency_key,
            status: JobStatus::Queued,
            mode: new_job.mode,
            prompt: new_job.prompt,
            input_image: new_job.input_image,
            resolution: new_job.resolution,
            aspect_ratio: new_job.aspect_ratio,
            sample_count: new_job.sample_count,
            model: new_job.model,
            attempts: 0,
            max_attempts: new_job.max_attempts,
            error_code: None,
            error_message: None,
            credential_id: None,
            result_urls: vec![],
            created_at: now,
            updated_at: now,
        };
        jobs.push(job.clone());
        Ok(job)
    }

    async fn get(&self, id: &str) -> DatabaseResult<Option<Job>> {
        Ok(self.jobs.lock().iter().find(|j| j.id == id).cloned())
    }

    async fn get_for_tenant(&self, tenant_id: Uuid, id: &str) -> DatabaseResult<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .iter()
            .find(|j| j.id == id && j.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: Uuid,
        filter: JobListFilter,
    ) -> DatabaseResult<JobPage> {
        let limit = filter.limit.clamp(1, 100) as usize;
        let cursor = filter.cursor.as_deref().and_then(decode_cursor);

        let mut items: Vec<Job> = self
            .jobs
            .lock()
            .iter()
            .filter(|j| j.tenant_id == tenant_id)
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .filter(|j| {
                cursor.as_ref().map_or(true, |(at, id)| {
                    (j.created_at, j.id.as_str()) < (*at, id.as_str())
                })
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));

        let has_more = items.len() > limit;
        items.truncate(limit);
        let next_cursor = if has_more {
            items.last().map(|j| encode_cursor(j.created_at, &j.id))
        } else {
            None
        };

        Ok(JobPage {
            items,
            next_cursor,
            has_more,
        })
    }

    async fn mark_running(&self, id: &str, credential_id: Uuid) -> DatabaseResult<bool> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
            return Ok(false);
        };
        if !job.status.is_runnable() {
            return Ok(false);
        }
        job.status = JobStatus::Running;
        job.credential_id = Some(credential_id);
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_succeeded(&self, id: &str) -> DatabaseResult<bool> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Running {
            return Ok(false);
        }
        job.status = JobStatus::Succeeded;
        job.error_code = None;
        job.error_message = None;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn increment_attempts(&self, id: &str) -> DatabaseResult<i32> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
        job.attempts += 1;
        job.updated_at = Utc::now();
        Ok(job.attempts)
    }

    async fn record_error(
        &self,
        id: &str,
        status: JobStatus,
        code: &str,
        message: &str,
    ) -> DatabaseResult<()> {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            if !job.status.is_terminal() {
                job.status = status;
                job.error_code = Some(code.to_string());
                job.error_message = Some(message.to_string());
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn append_result_url(&self, id: &str, url: &str) -> DatabaseResult<()> {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            job.result_urls.push(url.to_string());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn cancel(&self, tenant_id: Uuid, id: &str) -> DatabaseResult<CancelOutcome> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs
            .iter_mut()
            .find(|j| j.id == id && j.tenant_id == tenant_id)
        else {
            return Ok(CancelOutcome::NotFound);
        };
        if !job.status.is_runnable() {
            return Ok(CancelOutcome::InvalidState(job.status));
        }
        job.status = JobStatus::Canceled;
        job.updated_at = Utc::now();
        Ok(CancelOutcome::Canceled(job.clone()))
    }
}

/// In-memory tenant repository.
#[derive(Default)]
pub struct MemoryTenantRepository {
    tenants: Mutex<HashMap<Uuid, Tenant>>,
}

impl MemoryTenantRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tenant (test seeding).
    pub fn insert(&self, tenant: Tenant) {
        self.tenants.lock().insert(tenant.id, tenant);
    }
}

#[async_trait]
impl TenantRepository for MemoryTenantRepository {
    async fn find_by_fingerprint(&self, fingerprint: &str) -> DatabaseResult<Option<Tenant>> {
        Ok(self
            .tenants
            .lock()
            .values()
            .find(|t| t.api_key_fingerprint == fingerprint)
            .cloned())
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<Tenant>> {
        Ok(self.tenants.lock().get(&id).cloned())
    }
}

/// In-memory credential repository.
#[derive(Default)]
pub struct MemoryCredentialRepository {
    credentials: Mutex<Vec<Credential>>,
}

impl MemoryCredentialRepository {
    /// Create a repository seeded with credentials.
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self {
            credentials: Mutex::new(credentials),
        }
    }

    /// Insert a credential (test seeding).
    pub fn insert(&self, credential: Credential) {
        self.credentials.lock().push(credential);
    }

    /// Disable a credential by id.
    pub fn disable(&self, id: Uuid) {
        if let Some(c) = self.credentials.lock().iter_mut().find(|c| c.id == id) {
            c.enabled = false;
        }
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn list_enabled(&self, provider: &str) -> DatabaseResult<Vec<Credential>> {
        let mut credentials: Vec<Credential> = self
            .credentials
            .lock()
            .iter()
            .filter(|c| c.enabled && c.provider == provider)
            .cloned()
            .collect();
        credentials.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(credentials)
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<Credential>> {
        Ok(self
            .credentials
            .lock()
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }
}
