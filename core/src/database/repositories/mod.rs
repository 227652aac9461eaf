// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Repository contracts.
//!
//! Each repository exists as a Postgres implementation and an in-memory
//! fake with identical semantics; the executor and API only ever see the
//! traits. Status updates are compare-and-swap on the previous status so
//! concurrent workers and cancel requests cannot clobber each other.

pub mod credential;
pub mod job;
pub mod memory;
pub mod tenant;

pub use credential::PgCredentialRepository;
pub use job::PgJobRepository;
pub use memory::{MemoryCredentialRepository, MemoryJobRepository, MemoryTenantRepository};
pub use tenant::PgTenantRepository;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use super::error::DatabaseResult;
use super::models::Tenant;
use crate::credentials::Credential;
use crate::jobs::{AspectRatio, GenerationMode, Job, JobStatus, Resolution};

/// Parameters for creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Owning tenant
    pub tenant_id: Uuid,
    /// Idempotency token; a repeat within the tenant returns the
    /// existing job instead of creating a second row
    pub idempotency_key: Option<String>,
    /// Generation mode
    pub mode: GenerationMode,
    /// Prompt text
    pub prompt: String,
    /// Optional reference image data URL
    pub input_image: Option<String>,
    /// Optional resolution tier
    pub resolution: Option<Resolution>,
    /// Optional aspect ratio
    pub aspect_ratio: Option<AspectRatio>,
    /// Optional sample count
    pub sample_count: Option<i32>,
    /// Optional model hint
    pub model: Option<String>,
    /// Attempt ceiling
    pub max_attempts: i32,
}

/// Filter for listing a tenant's jobs.
#[derive(Debug, Clone, Default)]
pub struct JobListFilter {
    /// Restrict to one status
    pub status: Option<JobStatus>,
    /// Page size
    pub limit: i64,
    /// Opaque cursor from a previous page
    pub cursor: Option<String>,
}

/// One page of jobs.
#[derive(Debug, Clone)]
pub struct JobPage {
    /// Jobs in reverse creation order
    pub items: Vec<Job>,
    /// Cursor for the next page, when one exists
    pub next_cursor: Option<String>,
    /// Whether more pages exist
    pub has_more: bool,
}

/// Outcome of a cancel request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The job moved to CANCELED
    Canceled(Job),
    /// The job exists but is not in a cancelable status
    InvalidState(JobStatus),
    /// No such job for this tenant
    NotFound,
}

/// Job persistence.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create a job, or return the existing one when the idempotency
    /// token has been seen before for this tenant.
    async fn create(&self, new_job: NewJob) -> DatabaseResult<Job>;

    /// Fetch a job by id.
    async fn get(&self, id: &str) -> DatabaseResult<Option<Job>>;

    /// Fetch a job by id, scoped to a tenant.
    async fn get_for_tenant(&self, tenant_id: Uuid, id: &str) -> DatabaseResult<Option<Job>>;

    /// List a tenant's jobs, newest first, with cursor pagination.
    async fn list_for_tenant(
        &self,
        tenant_id: Uuid,
        filter: JobListFilter,
    ) -> DatabaseResult<JobPage>;

    /// CAS `{QUEUED,RETRYING} -> RUNNING`, persisting the chosen
    /// credential. Returns false when the job was not runnable (e.g.
    /// canceled in the meantime).
    async fn mark_running(&self, id: &str, credential_id: Uuid) -> DatabaseResult<bool>;

    /// CAS `RUNNING -> SUCCEEDED`. Returns false when the job is no
    /// longer running, in which case the result is discarded.
    async fn mark_succeeded(&self, id: &str) -> DatabaseResult<bool>;

    /// Increment the attempt counter, returning the new value.
    async fn increment_attempts(&self, id: &str) -> DatabaseResult<i32>;

    /// Record a failure: set status (RETRYING or FAILED) and the error
    /// fields, only while the job is still active.
    async fn record_error(
        &self,
        id: &str,
        status: JobStatus,
        code: &str,
        message: &str,
    ) -> DatabaseResult<()>;

    /// Append one result URL. Appends are monotone; nothing ever
    /// removes or reorders earlier entries.
    async fn append_result_url(&self, id: &str, url: &str) -> DatabaseResult<()>;

    /// CAS `{QUEUED,RETRYING} -> CANCELED` on behalf of the tenant.
    async fn cancel(&self, tenant_id: Uuid, id: &str) -> DatabaseResult<CancelOutcome>;
}

/// Tenant persistence.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Look a tenant up by API-key fingerprint.
    async fn find_by_fingerprint(&self, fingerprint: &str) -> DatabaseResult<Option<Tenant>>;

    /// Fetch a tenant by id.
    async fn get(&self, id: Uuid) -> DatabaseResult<Option<Tenant>>;
}

/// Credential persistence.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// All enabled credentials for a provider, in row creation order.
    async fn list_enabled(&self, provider: &str) -> DatabaseResult<Vec<Credential>>;

    /// Fetch a credential by id.
    async fn get(&self, id: Uuid) -> DatabaseResult<Option<Credential>>;
}

/// Generate a fresh opaque job id.
pub fn new_job_id() -> String {
    format!("job_{}", Uuid::new_v4().simple())
}

/// Encode a pagination cursor from a job's creation time and id.
pub fn encode_cursor(created_at: DateTime<Utc>, id: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}|{}", created_at.timestamp_micros(), id))
}

/// Decode a pagination cursor. Returns `None` for malformed input.
pub fn decode_cursor(cursor: &str) -> Option<(DateTime<Utc>, String)> {
    let raw = URL_SAFE_NO_PAD.decode(cursor).ok()?;
    let raw = String::from_utf8(raw).ok()?;
    let (micros, id) = raw.split_once('|')?;
    let micros: i64 = micros.parse().ok()?;
    let at = Utc.timestamp_micros(micros).single()?;
    Some((at, id.to_string()))
}
