// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The per-job execution pipeline.
//!
//! One call to [`JobExecutor::execute`] runs the whole admission ->
//! schedule -> cache -> provider -> store -> notify pipeline for one
//! job. Concurrency tokens are acquired in the fixed order Global ->
//! Credential -> Tenant and released in reverse on every exit path;
//! RPM admissions are never released, their windows slide on their own.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::{fingerprint, ResultCache};
use crate::coord::CoordError;
use crate::credentials::{CredentialScheduler, HealthTracker, PickRequest};
use crate::database::error::DatabaseError;
use crate::database::models::Tenant;
use crate::database::repositories::{JobRepository, TenantRepository};
use crate::jobs::{ErrorCode, Job, JobError, JobStatus};
use crate::limits::{
    global_conc_key, global_rpm_key, key_inflight_key, key_rpm_key, tenant_conc_key,
    tenant_rpm_key, AdmissionGuard, RateLimiter,
};
use crate::providers::{GenerateRequest, Provider};
use crate::queue::{JobQueue, RetryPolicy};
use crate::storage::{extension_for_mime, BlobStore};
use crate::webhook::{WebhookDeliverer, WebhookEvent};

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Provider tag jobs are scheduled against
    pub provider_tag: String,
    /// Instance-wide requests per minute
    pub global_rpm: u32,
    /// Instance-wide concurrent provider calls
    pub global_concurrency: u32,
    /// Retry backoff policy
    pub retry: RetryPolicy,
    /// Per-job wall-clock budget
    pub job_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            provider_tag: "gemini".to_string(),
            global_rpm: 600,
            global_concurrency: 100,
            retry: RetryPolicy::default(),
            job_timeout: Duration::from_secs(300),
        }
    }
}

/// Infrastructure failures that prevented the pipeline from running at
/// all; the worker re-enqueues the job for another try.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Persistence failure
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Coordination-store failure
    #[error(transparent)]
    Coord(#[from] CoordError),
}

/// What happened to one popped job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Terminal success
    Succeeded {
        /// Whether the result came from the cache
        from_cache: bool,
    },
    /// Retryable failure, re-enqueued with backoff
    Rescheduled {
        /// Classified failure
        code: ErrorCode,
        /// Delay before the next attempt
        delay: Duration,
    },
    /// Terminal failure
    Failed {
        /// Classified failure
        code: ErrorCode,
    },
    /// Nothing to do: job gone, canceled, or lost a race
    Skipped,
}

enum PipelineOutcome {
    Success { from_cache: bool },
    /// Another actor moved the row first (e.g. a cancel); discard.
    Lost,
}

/// The job executor.
pub struct JobExecutor {
    jobs: Arc<dyn JobRepository>,
    tenants: Arc<dyn TenantRepository>,
    provider: Arc<dyn Provider>,
    blobs: Arc<dyn BlobStore>,
    webhooks: Arc<dyn WebhookDeliverer>,
    queue: JobQueue,
    limiter: RateLimiter,
    scheduler: CredentialScheduler,
    health: HealthTracker,
    cache: ResultCache,
    config: ExecutorConfig,
}

impl JobExecutor {
    /// Assemble an executor from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        tenants: Arc<dyn TenantRepository>,
        provider: Arc<dyn Provider>,
        blobs: Arc<dyn BlobStore>,
        webhooks: Arc<dyn WebhookDeliverer>,
        queue: JobQueue,
        limiter: RateLimiter,
        scheduler: CredentialScheduler,
        health: HealthTracker,
        cache: ResultCache,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            jobs,
            tenants,
            provider,
            blobs,
            webhooks,
            queue,
            limiter,
            scheduler,
            health,
            cache,
            config,
        }
    }

    /// Execute one job end to end.
    pub async fn execute(&self, job_id: &str) -> Result<ExecutionOutcome, ExecuteError> {
        let Some(job) = self.jobs.get(job_id).await? else {
            warn!(job_id, "popped a job id with no row, skipping");
            return Ok(ExecutionOutcome::Skipped);
        };
        if !job.status.is_runnable() {
            debug!(job_id, status = %job.status, "job no longer runnable, skipping");
            return Ok(ExecutionOutcome::Skipped);
        }
        let Some(tenant) = self.tenants.get(job.tenant_id).await? else {
            error!(job_id, tenant_id = %job.tenant_id, "job references a missing tenant");
            self.jobs
                .record_error(
                    job_id,
                    JobStatus::Failed,
                    ErrorCode::UnknownError.as_str(),
                    "tenant not found",
                )
                .await?;
            return Ok(ExecutionOutcome::Failed {
                code: ErrorCode::UnknownError,
            });
        };

        let mut guard = self.limiter.guard();
        let pipeline = tokio::time::timeout(
            self.config.job_timeout,
            self.run_admitted(&job, &tenant, &mut guard),
        )
        .await;
        // Reverse-order release on every exit path, including timeout.
        guard.release_all().await;

        let pipeline = match pipeline {
            Ok(result) => result,
            Err(_) => Err(JobError::new(
                ErrorCode::UnknownError,
                format!("job exceeded {}s budget", self.config.job_timeout.as_secs()),
            )),
        };

        match pipeline {
            Ok(PipelineOutcome::Success { from_cache }) => {
                if let Some(snapshot) = self.jobs.get(job_id).await? {
                    if snapshot.status == JobStatus::Succeeded {
                        self.notify(&tenant, WebhookEvent::succeeded(&snapshot)).await;
                    }
                }
                info!(job_id, from_cache, "job succeeded");
                Ok(ExecutionOutcome::Succeeded { from_cache })
            }
            Ok(PipelineOutcome::Lost) => {
                debug!(job_id, "job row moved under us, result discarded");
                Ok(ExecutionOutcome::Skipped)
            }
            Err(job_error) => self.handle_failure(&job, &tenant, job_error).await,
        }
    }

    async fn run_admitted(
        &self,
        job: &Job,
        tenant: &Tenant,
        guard: &mut AdmissionGuard,
    ) -> Result<PipelineOutcome, JobError> {
        // 1. Global sliding window.
        let admission = self
            .limiter
            .admit_rpm(&global_rpm_key(), self.config.global_rpm)
            .await
            .map_err(coord_err)?;
        if !admission.admitted {
            return Err(JobError::denied(
                ErrorCode::GlobalRateLimit,
                "global rpm",
                admission.count,
                self.config.global_rpm,
            ));
        }

        // 2. Global concurrency.
        let admission = guard
            .admit(&global_conc_key(), self.config.global_concurrency)
            .await
            .map_err(coord_err)?;
        if !admission.admitted {
            return Err(JobError::denied(
                ErrorCode::GlobalConcLimit,
                "global concurrency",
                admission.value,
                self.config.global_concurrency,
            ));
        }

        // 3. Credential selection.
        let credential = self
            .scheduler
            .pick(PickRequest {
                provider: &self.config.provider_tag,
                preferred_endpoint: None,
                model: job.model.as_deref(),
                exclude_endpoints: &[],
                allow_fallback: true,
            })
            .await
            .map_err(|e| JobError::new(ErrorCode::UnknownError, e.to_string()))?
            .ok_or_else(|| {
                JobError::new(
                    ErrorCode::NoProviderKeyAvailable,
                    "all credentials cooling down, saturated, or disabled",
                )
            })?;

        // 4. Credential sliding window.
        let admission = self
            .limiter
            .admit_rpm(&key_rpm_key(credential.id), credential.rpm_limit as u32)
            .await
            .map_err(coord_err)?;
        if !admission.admitted {
            return Err(JobError::denied(
                ErrorCode::KeyRateLimit,
                "credential rpm",
                admission.count,
                credential.rpm_limit as u32,
            ));
        }

        // 5. Credential concurrency.
        let admission = guard
            .admit(
                &key_inflight_key(credential.id),
                credential.concurrency_limit as u32,
            )
            .await
            .map_err(coord_err)?;
        if !admission.admitted {
            return Err(JobError::denied(
                ErrorCode::KeyConcLimit,
                "credential concurrency",
                admission.value,
                credential.concurrency_limit as u32,
            ));
        }

        // 6. Tenant sliding window.
        let admission = self
            .limiter
            .admit_rpm(&tenant_rpm_key(tenant.id), tenant.plan_rpm as u32)
            .await
            .map_err(coord_err)?;
        if !admission.admitted {
            return Err(JobError::denied(
                ErrorCode::TenantRateLimit,
                "tenant rpm",
                admission.count,
                tenant.plan_rpm as u32,
            ));
        }

        // 7. Tenant concurrency.
        let admission = guard
            .admit(&tenant_conc_key(tenant.id), tenant.plan_concurrency as u32)
            .await
            .map_err(coord_err)?;
        if !admission.admitted {
            return Err(JobError::denied(
                ErrorCode::TenantConcLimit,
                "tenant concurrency",
                admission.value,
                tenant.plan_concurrency as u32,
            ));
        }

        // 8. Claim the row. A false here means the job was canceled (or
        // another worker won) after we loaded it.
        if !self
            .jobs
            .mark_running(&job.id, credential.id)
            .await
            .map_err(db_err)?
        {
            return Ok(PipelineOutcome::Lost);
        }

        // 9. Cache consult. Tokens are already held at this point, which
        // keeps cache stampedes under the same backpressure as real work.
        let cacheable = self.cache.is_cacheable(job.mode, &job.prompt);
        let fp = fingerprint(
            &job.prompt,
            job.model.as_deref(),
            job.resolution,
            job.aspect_ratio,
            job.sample_count,
        );
        if cacheable {
            if let Some(hit) = self.cache.lookup(&fp).await.map_err(coord_err)? {
                debug!(job_id = %job.id, "result cache hit");
                for url in &hit.urls {
                    self.jobs
                        .append_result_url(&job.id, url)
                        .await
                        .map_err(db_err)?;
                }
                if !self.jobs.mark_succeeded(&job.id).await.map_err(db_err)? {
                    return Ok(PipelineOutcome::Lost);
                }
                self.health
                    .record_success(&credential)
                    .await
                    .map_err(coord_err)?;
                return Ok(PipelineOutcome::Success { from_cache: true });
            }
        }

        // 10. Provider call.
        let response = match self
            .provider
            .generate(GenerateRequest {
                credential: credential.clone(),
                endpoint: credential.endpoint.clone(),
                prompt: job.prompt.clone(),
                reference_image: job.input_image.clone(),
                mode: job.mode,
                resolution: job.resolution,
                aspect_ratio: job.aspect_ratio,
                sample_count: job.sample_count,
                model: job.model.clone(),
            })
            .await
        {
            Ok(response) => response,
            Err(provider_error) => {
                let code = provider_error.error_code();
                if code == ErrorCode::ServiceOverload {
                    let _ = self
                        .health
                        .record_overload(&credential.provider, &credential.endpoint)
                        .await;
                }
                if code.is_credential_failure() {
                    let availability = self
                        .health
                        .record_failure(&credential)
                        .await
                        .map_err(coord_err)?;
                    if !availability.available {
                        warn!(
                            credential_id = %credential.id,
                            cooldown_until_ms = availability.cooldown_until_ms,
                            "credential entered cooldown"
                        );
                    }
                }
                return Err(JobError::new(code, provider_error.to_string()));
            }
        };

        // 11. Persist images, appending URLs as each upload lands so
        // pollers see progress.
        let urls = self.upload_images(job, &response.images).await?;

        // 12. Finalize; a cancel that raced us discards the result.
        if !self.jobs.mark_succeeded(&job.id).await.map_err(db_err)? {
            return Ok(PipelineOutcome::Lost);
        }

        if cacheable {
            self.cache
                .put(&fp, &urls, &response.model_used)
                .await
                .map_err(coord_err)?;
        }
        self.health
            .record_success(&credential)
            .await
            .map_err(coord_err)?;

        Ok(PipelineOutcome::Success { from_cache: false })
    }

    async fn upload_images(
        &self,
        job: &Job,
        images: &[crate::providers::GeneratedImage],
    ) -> Result<Vec<String>, JobError> {
        let uploads = images.iter().enumerate().map(|(index, image)| {
            let blobs = Arc::clone(&self.blobs);
            let jobs = Arc::clone(&self.jobs);
            let job_id = job.id.clone();
            async move {
                let (mime, data) = image
                    .url
                    .strip_prefix("data:")
                    .and_then(|rest| rest.split_once(";base64,"))
                    .ok_or_else(|| {
                        JobError::new(ErrorCode::StorageError, "provider image is not a data URL")
                    })?;
                let bytes = BASE64.decode(data).map_err(|e| {
                    JobError::new(ErrorCode::StorageError, format!("image decode failed: {e}"))
                })?;
                let key = format!("jobs/{job_id}/{index}.{}", extension_for_mime(mime));
                let url = blobs.put(&key, mime, &bytes).await.map_err(|e| {
                    JobError::new(ErrorCode::StorageError, format!("blob write failed: {e}"))
                })?;
                jobs.append_result_url(&job_id, &url).await.map_err(db_err)?;
                Ok::<String, JobError>(url)
            }
        });

        join_all(uploads).await.into_iter().collect()
    }

    async fn handle_failure(
        &self,
        job: &Job,
        tenant: &Tenant,
        job_error: JobError,
    ) -> Result<ExecutionOutcome, ExecuteError> {
        let attempts = self.jobs.increment_attempts(&job.id).await?;
        let code = job_error.code;

        if job_error.is_retryable() && attempts < job.max_attempts {
            self.jobs
                .record_error(
                    &job.id,
                    JobStatus::Retrying,
                    code.as_str(),
                    &job_error.message,
                )
                .await?;
            let delay = self.config.retry.backoff(attempts, code);
            self.queue
                .enqueue_delayed(&job.id, delay)
                .await?;
            info!(
                job_id = %job.id,
                code = %code,
                attempts,
                delay_ms = delay.as_millis() as u64,
                "job rescheduled"
            );
            return Ok(ExecutionOutcome::Rescheduled { code, delay });
        }

        self.jobs
            .record_error(&job.id, JobStatus::Failed, code.as_str(), &job_error.message)
            .await?;
        warn!(job_id = %job.id, code = %code, attempts, "job failed terminally");

        if let Some(snapshot) = self.jobs.get(&job.id).await? {
            self.notify(
                tenant,
                WebhookEvent::failed(&snapshot, code, &job_error.message),
            )
            .await;
        }

        Ok(ExecutionOutcome::Failed { code })
    }

    async fn notify(&self, tenant: &Tenant, event: WebhookEvent) {
        let Some((endpoint, secret)) = tenant.webhook_target() else {
            return;
        };
        if let Err(e) = self.webhooks.deliver(endpoint, secret, &event).await {
            // At-least-once only: after the deliverer exhausts its
            // attempts the event is dropped with a log line.
            error!(
                event_id = %event.event_id,
                job_id = %event.job_id,
                code = %e.code(),
                "webhook delivery failed permanently"
            );
        }
    }
}

fn coord_err(e: CoordError) -> JobError {
    JobError::new(ErrorCode::UnknownError, e.to_string())
}

fn db_err(e: DatabaseError) -> JobError {
    JobError::new(ErrorCode::UnknownError, e.to_string())
}

impl JobExecutor {
    /// The queue this executor re-enqueues retries onto.
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }
}
