// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end pipeline tests over the in-memory fakes.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use image_gateway_core::api::api_key_fingerprint;
use image_gateway_core::cache::{CacheConfig, ResultCache};
use image_gateway_core::coord::{CoordinationStore, MemoryStore};
use image_gateway_core::credentials::{
    Credential, CredentialScheduler, HealthConfig, HealthTracker, PickRequest,
};
use image_gateway_core::database::models::Tenant;
use image_gateway_core::database::repositories::{
    JobRepository, MemoryCredentialRepository, MemoryJobRepository, MemoryTenantRepository, NewJob,
};
use image_gateway_core::executor::{ExecutionOutcome, ExecutorConfig, JobExecutor};
use image_gateway_core::jobs::{ErrorCode, GenerationMode, Job, JobStatus};
use image_gateway_core::limits::{key_inflight_key, RateLimiter};
use image_gateway_core::providers::{
    AuthStyle, EndpointDescriptor, EndpointRegistry, MockProvider, ProviderError,
};
use image_gateway_core::providers::mock::MockOutcome;
use image_gateway_core::queue::{JobQueue, RetryPolicy};
use image_gateway_core::storage::MemoryBlobStore;
use image_gateway_core::webhook::{verify, RecordingDeliverer};

struct Fixture {
    store: Arc<MemoryStore>,
    jobs: Arc<MemoryJobRepository>,
    tenants: Arc<MemoryTenantRepository>,
    credentials: Arc<MemoryCredentialRepository>,
    provider: Arc<MockProvider>,
    blobs: Arc<MemoryBlobStore>,
    webhooks: Arc<RecordingDeliverer>,
    queue: JobQueue,
    scheduler: CredentialScheduler,
    health: HealthTracker,
    executor: JobExecutor,
}

fn registry() -> Arc<EndpointRegistry> {
    Arc::new(EndpointRegistry::new(vec![
        EndpointDescriptor {
            tag: "primary".into(),
            base_url: "https://primary.example.com/v1beta".into(),
            auth: AuthStyle::Query,
            default_model: "gemini-2.5-flash-image".into(),
            preferred_models: vec![],
        },
        EndpointDescriptor {
            tag: "proxy-a".into(),
            base_url: "https://proxy-a.example.com/v1beta".into(),
            auth: AuthStyle::Bearer,
            default_model: "gemini-2.5-flash-image".into(),
            preferred_models: vec![],
        },
    ]))
}

fn fixture() -> Fixture {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn CoordinationStore> = store.clone();
    let jobs = Arc::new(MemoryJobRepository::new());
    let tenants = Arc::new(MemoryTenantRepository::new());
    let credentials = Arc::new(MemoryCredentialRepository::new(vec![]));
    let provider = Arc::new(MockProvider::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let webhooks = Arc::new(RecordingDeliverer::new());

    let health = HealthTracker::new(store_dyn.clone(), HealthConfig::default());
    let limiter = RateLimiter::new(store_dyn.clone(), 360);
    let scheduler = CredentialScheduler::new(
        credentials.clone(),
        health.clone(),
        store_dyn.clone(),
        registry(),
    );
    let cache = ResultCache::new(store_dyn.clone(), CacheConfig::default());
    let queue = JobQueue::new(store_dyn);

    let executor = JobExecutor::new(
        jobs.clone(),
        tenants.clone(),
        provider.clone(),
        blobs.clone(),
        webhooks.clone(),
        queue.clone(),
        limiter,
        scheduler.clone(),
        health.clone(),
        cache,
        ExecutorConfig {
            provider_tag: "gemini".into(),
            global_rpm: 10_000,
            global_concurrency: 1_000,
            retry: RetryPolicy::default(),
            job_timeout: Duration::from_secs(30),
        },
    );

    Fixture {
        store,
        jobs,
        tenants,
        credentials,
        provider,
        blobs,
        webhooks,
        queue,
        scheduler,
        health,
        executor,
    }
}

fn tenant(plan_rpm: i32, plan_concurrency: i32, with_webhook: bool) -> Tenant {
    Tenant {
        id: Uuid::new_v4(),
        name: "acme".into(),
        api_key_fingerprint: api_key_fingerprint("salt", "sk_test"),
        plan_rpm,
        plan_concurrency,
        webhook_url: with_webhook.then(|| "https://acme.example.com/hooks".to_string()),
        webhook_secret: with_webhook.then(|| "whsec_acme".to_string()),
        webhook_enabled: with_webhook,
        created_at: Utc::now(),
    }
}

fn credential(seq: u128, endpoint: &str, priority: i32) -> Credential {
    Credential {
        id: Uuid::from_u128(seq),
        provider: "gemini".into(),
        endpoint: endpoint.into(),
        secret: format!("secret-{seq}"),
        rpm_limit: 1_000,
        concurrency_limit: 10,
        priority,
        enabled: true,
        created_at: Utc::now() + ChronoDuration::milliseconds(seq as i64),
    }
}

async fn submit(fixture: &Fixture, tenant: &Tenant, prompt: &str, mode: GenerationMode) -> Job {
    submit_with_attempts(fixture, tenant, prompt, mode, 4).await
}

async fn submit_with_attempts(
    fixture: &Fixture,
    tenant: &Tenant,
    prompt: &str,
    mode: GenerationMode,
    max_attempts: i32,
) -> Job {
    let job = fixture
        .jobs
        .create(NewJob {
            tenant_id: tenant.id,
            idempotency_key: None,
            mode,
            prompt: prompt.into(),
            input_image: None,
            resolution: None,
            aspect_ratio: None,
            sample_count: None,
            model: None,
            max_attempts,
        })
        .await
        .unwrap();
    fixture.queue.enqueue(&job.id).await.unwrap();
    job
}

#[tokio::test]
async fn test_happy_path() {
    let fixture = fixture();
    let tenant = tenant(60, 5, true);
    fixture.tenants.insert(tenant.clone());
    fixture.credentials.insert(credential(1, "primary", 0));

    let job = submit(&fixture, &tenant, "A red apple on a table", GenerationMode::Final).await;

    let popped = fixture.queue.pop_due().await.unwrap().unwrap();
    assert_eq!(popped, job.id);

    let outcome = fixture.executor.execute(&job.id).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Succeeded { from_cache: false });

    let stored = fixture.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Succeeded);
    assert_eq!(stored.result_urls.len(), 1);
    assert!(stored.error_code.is_none());

    // The image landed in the blob store
    assert_eq!(fixture.blobs.len(), 1);

    // Webhook delivered with a verifiable signature over the exact bytes
    let deliveries = fixture.webhooks.deliveries();
    assert_eq!(deliveries.len(), 1);
    let delivery = &deliveries[0];
    assert_eq!(delivery.event.status, JobStatus::Succeeded);
    assert_eq!(delivery.event.job_id, job.id);
    assert!(verify("whsec_acme", &delivery.body, &delivery.signature));

    // All concurrency tokens released
    assert_eq!(fixture.store.counter_value("lim:global:conc"), 0);
    assert_eq!(
        fixture
            .store
            .counter_value(&key_inflight_key(Uuid::from_u128(1))),
        0
    );
}

#[tokio::test]
async fn test_tenant_rate_limit_reschedules() {
    let fixture = fixture();
    let tenant = tenant(2, 5, false);
    fixture.tenants.insert(tenant.clone());
    fixture.credentials.insert(credential(1, "primary", 0));

    let first = submit(&fixture, &tenant, "A red apple on a table", GenerationMode::Final).await;
    let second = submit(&fixture, &tenant, "A blue apple on a table", GenerationMode::Final).await;
    let third = submit(&fixture, &tenant, "A green apple on a table", GenerationMode::Final).await;

    assert!(matches!(
        fixture.executor.execute(&first.id).await.unwrap(),
        ExecutionOutcome::Succeeded { .. }
    ));
    assert!(matches!(
        fixture.executor.execute(&second.id).await.unwrap(),
        ExecutionOutcome::Succeeded { .. }
    ));

    let outcome = fixture.executor.execute(&third.id).await.unwrap();
    match outcome {
        ExecutionOutcome::Rescheduled { code, .. } => {
            assert_eq!(code, ErrorCode::TenantRateLimit)
        }
        other => panic!("expected reschedule, got {other:?}"),
    }

    let stored = fixture.jobs.get(&third.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Retrying);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.error_code.as_deref(), Some("TENANT_RATE_LIMIT"));
}

#[tokio::test]
async fn test_five_consecutive_failures_trip_cooldown() {
    let fixture = fixture();
    let tenant = tenant(1_000, 50, false);
    fixture.tenants.insert(tenant.clone());
    fixture.credentials.insert(credential(1, "primary", 0));

    fixture.provider.push_failures(5, || ProviderError::Server {
        status: 500,
        message: "boom".into(),
    });

    // Five jobs, one attempt each, all failing on the same credential
    for i in 0..5 {
        let job = submit_with_attempts(
            &fixture,
            &tenant,
            &format!("A painting of failure number {i}"),
            GenerationMode::Draft,
            1,
        )
        .await;
        let outcome = fixture.executor.execute(&job.id).await.unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Failed {
                code: ErrorCode::ServerError
            }
        );
    }

    // The credential is now invisible to the scheduler
    let picked = fixture
        .scheduler
        .pick(PickRequest {
            provider: "gemini",
            allow_fallback: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(picked.is_none());

    // And the next job fails admission with NO_PROVIDER_KEY_AVAILABLE
    let job = submit(&fixture, &tenant, "A portrait of a locked door", GenerationMode::Final).await;
    match fixture.executor.execute(&job.id).await.unwrap() {
        ExecutionOutcome::Rescheduled { code, .. } => {
            assert_eq!(code, ErrorCode::NoProviderKeyAvailable)
        }
        other => panic!("expected reschedule, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cooldown_falls_over_to_second_credential() {
    let fixture = fixture();
    let tenant = tenant(1_000, 50, false);
    fixture.tenants.insert(tenant.clone());
    fixture.credentials.insert(credential(1, "primary", 0));
    fixture.credentials.insert(credential(2, "proxy-a", 50));

    // Cool the preferred credential down directly
    let cooling = credential(1, "primary", 0);
    for _ in 0..5 {
        fixture.health.record_failure(&cooling).await.unwrap();
    }

    let job = submit(&fixture, &tenant, "A lighthouse in a storm", GenerationMode::Final).await;
    assert!(matches!(
        fixture.executor.execute(&job.id).await.unwrap(),
        ExecutionOutcome::Succeeded { .. }
    ));

    let stored = fixture.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.credential_id, Some(Uuid::from_u128(2)));
}

#[tokio::test]
async fn test_retryable_overload_then_success() {
    let fixture = fixture();
    let tenant = tenant(1_000, 50, false);
    fixture.tenants.insert(tenant.clone());
    fixture.credentials.insert(credential(1, "primary", 0));

    fixture
        .provider
        .push(MockOutcome::Fail(ProviderError::Overloaded("busy".into())));

    let job = submit(&fixture, &tenant, "A city skyline at dusk", GenerationMode::Final).await;

    match fixture.executor.execute(&job.id).await.unwrap() {
        ExecutionOutcome::Rescheduled { code, delay } => {
            assert_eq!(code, ErrorCode::ServiceOverload);
            // Overload backoff is allowed to stretch to the 60s ceiling
            assert!(delay <= Duration::from_secs(60));
        }
        other => panic!("expected reschedule, got {other:?}"),
    }

    // The retry (driven by the queue in production) succeeds
    assert!(matches!(
        fixture.executor.execute(&job.id).await.unwrap(),
        ExecutionOutcome::Succeeded { .. }
    ));
    let stored = fixture.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Succeeded);
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
async fn test_non_retryable_failure_finalizes_with_webhook() {
    let fixture = fixture();
    let tenant = tenant(1_000, 50, true);
    fixture.tenants.insert(tenant.clone());
    fixture.credentials.insert(credential(1, "primary", 0));

    fixture.provider.push(MockOutcome::Fail(
        ProviderError::InvalidRequest("prompt blocked".into()),
    ));

    let job = submit(&fixture, &tenant, "A forbidden subject entirely", GenerationMode::Final).await;
    let outcome = fixture.executor.execute(&job.id).await.unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::Failed {
            code: ErrorCode::InvalidRequest
        }
    );

    let stored = fixture.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.result_urls.is_empty());
    assert_eq!(stored.error_code.as_deref(), Some("INVALID_REQUEST"));

    let deliveries = fixture.webhooks.deliveries();
    assert_eq!(deliveries.len(), 1);
    let event = &deliveries[0].event;
    assert_eq!(event.status, JobStatus::Failed);
    assert_eq!(event.error.as_ref().unwrap().code, "INVALID_REQUEST");
}

#[tokio::test]
async fn test_attempt_budget_exhaustion() {
    let fixture = fixture();
    let tenant = tenant(1_000, 50, false);
    fixture.tenants.insert(tenant.clone());
    fixture.credentials.insert(credential(1, "primary", 0));

    fixture.provider.push_failures(2, || ProviderError::Server {
        status: 502,
        message: "bad gateway".into(),
    });

    let job = submit_with_attempts(
        &fixture,
        &tenant,
        "A bridge over a canyon",
        GenerationMode::Final,
        2,
    )
    .await;

    assert!(matches!(
        fixture.executor.execute(&job.id).await.unwrap(),
        ExecutionOutcome::Rescheduled { .. }
    ));
    // Second attempt exhausts the budget
    assert_eq!(
        fixture.executor.execute(&job.id).await.unwrap(),
        ExecutionOutcome::Failed {
            code: ErrorCode::ServerError
        }
    );

    let stored = fixture.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.attempts, 2);
    assert!(stored.attempts <= stored.max_attempts);
}

#[tokio::test]
async fn test_cancel_before_execution() {
    let fixture = fixture();
    let tenant = tenant(1_000, 50, true);
    fixture.tenants.insert(tenant.clone());
    fixture.credentials.insert(credential(1, "primary", 0));

    let job = submit(&fixture, &tenant, "A ship that never sails", GenerationMode::Final).await;
    fixture.jobs.cancel(tenant.id, &job.id).await.unwrap();

    let outcome = fixture.executor.execute(&job.id).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Skipped);

    let stored = fixture.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Canceled);
    // No provider call, no webhook
    assert_eq!(fixture.provider.call_count(), 0);
    assert!(fixture.webhooks.is_empty());
}

#[tokio::test]
async fn test_cache_hit_skips_provider() {
    let fixture = fixture();
    let tenant = tenant(1_000, 50, false);
    fixture.tenants.insert(tenant.clone());
    fixture.credentials.insert(credential(1, "primary", 0));

    let prompt = "A watercolor fox in the snow";
    let first = submit(&fixture, &tenant, prompt, GenerationMode::Final).await;
    assert_eq!(
        fixture.executor.execute(&first.id).await.unwrap(),
        ExecutionOutcome::Succeeded { from_cache: false }
    );
    let first_stored = fixture.jobs.get(&first.id).await.unwrap().unwrap();

    let second = submit(&fixture, &tenant, prompt, GenerationMode::Final).await;
    assert_eq!(
        fixture.executor.execute(&second.id).await.unwrap(),
        ExecutionOutcome::Succeeded { from_cache: true }
    );
    let second_stored = fixture.jobs.get(&second.id).await.unwrap().unwrap();

    // Identical URLs, exactly one provider call
    assert_eq!(first_stored.result_urls, second_stored.result_urls);
    assert_eq!(fixture.provider.call_count(), 1);
}

#[tokio::test]
async fn test_draft_mode_bypasses_cache() {
    let fixture = fixture();
    let tenant = tenant(1_000, 50, false);
    fixture.tenants.insert(tenant.clone());
    fixture.credentials.insert(credential(1, "primary", 0));

    let prompt = "A charcoal sketch of a violin";
    let first = submit(&fixture, &tenant, prompt, GenerationMode::Draft).await;
    fixture.executor.execute(&first.id).await.unwrap();
    let second = submit(&fixture, &tenant, prompt, GenerationMode::Draft).await;
    let outcome = fixture.executor.execute(&second.id).await.unwrap();

    assert_eq!(outcome, ExecutionOutcome::Succeeded { from_cache: false });
    assert_eq!(fixture.provider.call_count(), 2);
}

#[tokio::test]
async fn test_saturated_credentials_deny_admission() {
    let fixture = fixture();
    let tenant = tenant(1_000, 50, false);
    fixture.tenants.insert(tenant.clone());
    let mut saturated = credential(1, "primary", 0);
    saturated.concurrency_limit = 1;
    fixture.credentials.insert(saturated);

    // Another worker holds the only in-flight slot
    fixture
        .store
        .concurrency_admit(&key_inflight_key(Uuid::from_u128(1)), 10, 300)
        .await
        .unwrap();

    let job = submit(&fixture, &tenant, "A marble statue of patience", GenerationMode::Final).await;
    match fixture.executor.execute(&job.id).await.unwrap() {
        ExecutionOutcome::Rescheduled { code, .. } => {
            assert_eq!(code, ErrorCode::NoProviderKeyAvailable)
        }
        other => panic!("expected reschedule, got {other:?}"),
    }
    assert_eq!(fixture.provider.call_count(), 0);
}

#[tokio::test]
async fn test_multiple_images_all_persisted() {
    let fixture = fixture();
    let tenant = tenant(1_000, 50, false);
    fixture.tenants.insert(tenant.clone());
    fixture.credentials.insert(credential(1, "primary", 0));

    fixture.provider.push(MockOutcome::Images(3));

    let job = submit(&fixture, &tenant, "A triptych of the seasons", GenerationMode::Final).await;
    fixture.executor.execute(&job.id).await.unwrap();

    let stored = fixture.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.result_urls.len(), 3);
    assert_eq!(fixture.blobs.len(), 3);
}
